//! Fixed-interval poll timer driven by the host's event loop.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PollTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl PollTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    /// Time until the next tick, if running.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.next_due.map(|due| due.saturating_duration_since(now))
    }

    /// Returns true once per elapsed interval. Missed ticks are not queued.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_after_interval() {
        let t0 = Instant::now();
        let mut timer = PollTimer::new(Duration::from_millis(200));
        assert!(!timer.poll(t0 + Duration::from_secs(1)));

        timer.start(t0);
        assert!(!timer.poll(t0 + Duration::from_millis(100)));
        assert!(timer.poll(t0 + Duration::from_millis(250)));
        assert!(!timer.poll(t0 + Duration::from_millis(300)));
        // Late polls fire once.
        assert!(timer.poll(t0 + Duration::from_secs(5)));
        assert!(!timer.poll(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_stop_disables() {
        let t0 = Instant::now();
        let mut timer = PollTimer::new(Duration::from_millis(10));
        timer.start(t0);
        assert!(timer.is_active());
        timer.stop();
        assert!(!timer.poll(t0 + Duration::from_secs(1)));
        assert_eq!(timer.remaining(t0), None);
    }
}

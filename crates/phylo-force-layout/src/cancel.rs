//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a cloneable flag. Requesting cancellation only
//! sets the flag; the job polls [`CancellationToken::is_cancelled`] at the
//! top of each batch and inside its time-boxed inner loop. A job may also
//! cancel its own token once it has converged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

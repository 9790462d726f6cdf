//! Background job dispatcher.
//!
//! Jobs run on named pools of worker threads. Each pool has a bounded
//! priority queue; a full queue rejects new work with
//! [`DispatchError::QueueFull`], which callers treat as resource exhaustion.
//! State changes are reported as [`JobNotification`]s on the channel given to
//! [`JobDispatcher::start_job`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::DispatchError;

/// Name of the pool created by [`JobDispatcher::with_default_pool`].
pub const DEFAULT_POOL: &str = "ThreadPool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

/// State of a job as seen through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// Queued or executing.
    Running,
    Completed,
    Canceled,
    /// Never started, or deleted.
    Invalid,
}

/// How a job's `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Canceled,
}

impl From<JobOutcome> for JobState {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed => JobState::Completed,
            JobOutcome::Canceled => JobState::Canceled,
        }
    }
}

/// Sent once when a job leaves `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobNotification {
    pub job_id: JobId,
    pub state: JobState,
}

/// A cancellable unit of work.
pub trait Job: Send + 'static {
    fn name(&self) -> &str {
        "job"
    }

    /// Runs to completion. Implementations poll `cancel` regularly.
    fn run(&mut self, cancel: &CancellationToken) -> JobOutcome;
}

/// Size of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub threads: usize,
    /// Jobs that may wait in the queue; 0 rejects every job.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            queue_capacity: 64,
        }
    }
}

struct QueuedJob {
    id: JobId,
    priority: i32,
    seq: u64,
    job: Box<dyn Job>,
    token: CancellationToken,
    notify: Sender<JobNotification>,
    auto_delete: bool,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // Max-heap: higher priority first, then first come first served.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct PoolQueue {
    heap: BinaryHeap<QueuedJob>,
    shutdown: bool,
}

struct Pool {
    name: String,
    capacity: usize,
    queue: Mutex<PoolQueue>,
    available: Condvar,
}

impl Pool {
    fn lock(&self) -> MutexGuard<'_, PoolQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_job(&self) -> Option<QueuedJob> {
        let mut queue = self.lock();
        loop {
            if let Some(job) = queue.heap.pop() {
                return Some(job);
            }
            if queue.shutdown {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

struct JobRecord {
    state: JobState,
    token: CancellationToken,
}

#[derive(Default)]
struct Shared {
    pools: Mutex<HashMap<String, Arc<Pool>>>,
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    next_id: AtomicU64,
}

impl Shared {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<String, Arc<Pool>>> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs [`Job`]s on named thread pools.
pub struct JobDispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for JobDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl JobDispatcher {
    /// A dispatcher without pools.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// A dispatcher with a [`DEFAULT_POOL`] of `threads` workers.
    pub fn with_default_pool(threads: usize) -> Result<Self, DispatchError> {
        let dispatcher = Self::new();
        dispatcher.add_pool(
            DEFAULT_POOL,
            PoolConfig {
                threads,
                ..PoolConfig::default()
            },
        )?;
        Ok(dispatcher)
    }

    pub fn add_pool(&self, name: &str, config: PoolConfig) -> Result<(), DispatchError> {
        let pool = Arc::new(Pool {
            name: name.to_string(),
            capacity: config.queue_capacity,
            queue: Mutex::new(PoolQueue::default()),
            available: Condvar::new(),
        });

        let threads = config.threads.max(1);
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let worker_pool = Arc::clone(&pool);
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&shared, &worker_pool));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    pool.lock().shutdown = true;
                    pool.available.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(DispatchError::Spawn(e.to_string()));
                }
            }
        }

        info!(pool = name, threads = handles.len(), capacity = config.queue_capacity, "thread pool started");
        self.shared.pools().insert(name.to_string(), pool);
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handles);
        Ok(())
    }

    /// Queues `job` on `pool_name`.
    ///
    /// The job reports `Running` until it finishes. With `auto_delete` its
    /// record is dropped right after the final notification, after which its
    /// state reads as `Invalid`.
    pub fn start_job(
        &self,
        job: Box<dyn Job>,
        pool_name: &str,
        notify: Sender<JobNotification>,
        priority: i32,
        auto_delete: bool,
    ) -> Result<JobId, DispatchError> {
        let pool = self
            .shared
            .pools()
            .get(pool_name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownPool(pool_name.to_string()))?;

        let mut queue = pool.lock();
        if queue.shutdown {
            return Err(DispatchError::PoolShutDown(pool.name.clone()));
        }
        if queue.heap.len() >= pool.capacity {
            return Err(DispatchError::QueueFull {
                pool: pool.name.clone(),
                capacity: pool.capacity,
            });
        }

        let seq = self.shared.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let id = JobId(seq + 1);
        let token = CancellationToken::new();
        self.shared.jobs().insert(
            id,
            JobRecord {
                state: JobState::Running,
                token: token.clone(),
            },
        );
        debug!(job = ?id, name = job.name(), pool = pool_name, priority, "job queued");
        queue.heap.push(QueuedJob {
            id,
            priority,
            seq,
            job,
            token,
            notify,
            auto_delete,
        });
        drop(queue);
        pool.available.notify_one();
        Ok(id)
    }

    /// Requests cooperative cancellation.
    pub fn cancel_job(&self, id: JobId) -> Result<(), DispatchError> {
        let jobs = self.shared.jobs();
        let record = jobs.get(&id).ok_or(DispatchError::UnknownJob(id))?;
        record.token.cancel();
        Ok(())
    }

    /// Forgets a job. A job that is still executing is cancelled and keeps
    /// its resources until its worker returns.
    pub fn delete_job(&self, id: JobId) -> Result<(), DispatchError> {
        let record = self
            .shared
            .jobs()
            .remove(&id)
            .ok_or(DispatchError::UnknownJob(id))?;
        if record.state == JobState::Running {
            warn!(job = ?id, "deleting a running job");
            record.token.cancel();
        }
        Ok(())
    }

    pub fn job_state(&self, id: JobId) -> JobState {
        self.shared
            .jobs()
            .get(&id)
            .map_or(JobState::Invalid, |record| record.state)
    }

    /// Stops accepting work, cancels outstanding jobs and joins all workers.
    pub fn shutdown(&self) {
        for pool in self.shared.pools().values() {
            pool.lock().shutdown = true;
            pool.available.notify_all();
        }
        for record in self.shared.jobs().values() {
            record.token.cancel();
        }
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("dispatcher worker panicked");
            }
        }
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, pool: &Pool) {
    while let Some(queued) = pool.next_job() {
        run_queued(shared, queued);
    }
    debug!(pool = %pool.name, "worker exiting");
}

fn run_queued(shared: &Shared, queued: QueuedJob) {
    let QueuedJob {
        id,
        mut job,
        token,
        notify,
        auto_delete,
        ..
    } = queued;

    let outcome = if token.is_cancelled() {
        JobOutcome::Canceled
    } else {
        match panic::catch_unwind(AssertUnwindSafe(|| job.run(&token))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(job = ?id, name = job.name(), "job panicked; reporting as canceled");
                JobOutcome::Canceled
            }
        }
    };
    let state = JobState::from(outcome);

    if let Some(record) = shared.jobs().get_mut(&id) {
        record.state = state;
    }
    debug!(job = ?id, ?state, "job finished");
    // The receiver may be gone if the owner was dropped.
    let _ = notify.send(JobNotification { job_id: id, state });
    if auto_delete {
        shared.jobs().remove(&id);
    }
}

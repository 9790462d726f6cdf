//! Error types for job dispatch and layout control.

use phylo_force_core::TreeError;
use thiserror::Error;

use crate::dispatcher::JobId;

/// Errors reported by the [`JobDispatcher`](crate::JobDispatcher).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No pool with this name was registered.
    #[error("unknown thread pool: {0}")]
    UnknownPool(String),

    /// The pool is shutting down and accepts no new work.
    #[error("thread pool {0} is shut down")]
    PoolShutDown(String),

    /// The pool queue is full.
    #[error("thread pool {pool} cannot accept more jobs (capacity {capacity})")]
    QueueFull { pool: String, capacity: usize },

    /// The job was never started or has already been deleted.
    #[error("unknown job: {0:?}")]
    UnknownJob(JobId),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl DispatchError {
    /// True when the dispatcher rejected work for lack of capacity.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, DispatchError::QueueFull { .. } | DispatchError::PoolShutDown(_))
    }
}

/// Errors reported by the layout controller.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for layout operations.
pub type Result<T> = std::result::Result<T, LayoutError>;

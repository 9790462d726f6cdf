//! Asynchronous force-directed layout for phylogenetic trees.
//!
//! ## Architecture
//!
//! ```text
//!  UI thread                              worker thread
//! ┌──────────────────────────┐          ┌──────────────────────────┐
//! │ ForceLayoutController    │  start   │ ForceJob                 │
//! │  radial seed             │────────▶ │  ParticleSystem::update  │
//! │  poll timer (200 ms)     │          │  (time-boxed batches)    │
//! │  BoundaryCalculator      │          │                          │
//! └───────────┬──────────────┘          └───────────┬──────────────┘
//!             │      TreeHandle: Mutex<{tree, SyncState}>          │
//!             └──────────── claim / render ◀──── publish ─────────┘
//! ```
//!
//! Without a [`JobDispatcher`] the controller runs the same simulation
//! synchronously in bounded batches.

pub mod cancel;
pub mod controller;
pub mod dispatcher;
mod error;
pub mod grid;
pub mod job;
pub mod params;
pub mod particle;
pub mod sync;
pub mod timer;

pub use cancel::CancellationToken;
pub use controller::{ForceLayoutController, LayoutHost, LayoutMode, LayoutOutcome};
pub use dispatcher::{
    Job, JobDispatcher, JobId, JobNotification, JobOutcome, JobState, PoolConfig, DEFAULT_POOL,
};
pub use error::{DispatchError, LayoutError, Result};
pub use job::ForceJob;
pub use params::{ControllerConfig, FallbackParams, PhysicsParams, PublishCadence};
pub use particle::{ParticleSystem, SharedParams};
pub use sync::{SyncState, TreeHandle, TreeSlot};
pub use timer::PollTimer;

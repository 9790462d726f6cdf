//! Tree shared between the UI thread and the physics worker.
//!
//! The tree and its [`SyncState`] live behind one mutex, so a state
//! transition and the position copy it guards always happen together.
//!
//! Protocol:
//! - the worker publishes (`NotSynched`, copy, `Refreshed`) only when the
//!   state is not `RenderInProgress`;
//! - the UI claims a publication by moving `Refreshed` to
//!   `RenderInProgress`, reads positions, and releases it as `Synched`.

use std::sync::{Arc, Mutex, MutexGuard};

use phylo_force_core::PhyloTree;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    /// The worker is copying positions.
    NotSynched,
    /// The UI owns the last publication; the worker must not write.
    RenderInProgress,
    /// The UI has consumed the last publication.
    Synched,
    /// A new publication is waiting for the UI.
    Refreshed,
}

#[derive(Debug)]
pub struct TreeSlot {
    pub tree: PhyloTree,
    pub sync: SyncState,
}

/// Cloneable handle to the shared tree.
#[derive(Debug, Clone)]
pub struct TreeHandle(Arc<Mutex<TreeSlot>>);

impl TreeHandle {
    pub fn new(tree: PhyloTree) -> Self {
        Self(Arc::new(Mutex::new(TreeSlot {
            tree,
            sync: SyncState::Synched,
        })))
    }

    /// Locks the slot. A panic on another thread never leaves positions in a
    /// state worse than stale, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, TreeSlot> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sync_state(&self) -> SyncState {
        self.lock().sync
    }

    pub fn set_sync_state(&self, state: SyncState) {
        self.lock().sync = state;
    }

    /// Moves `from` to `to` atomically; returns whether the state matched.
    pub fn transition(&self, from: SyncState, to: SyncState) -> bool {
        let mut slot = self.lock();
        if slot.sync == from {
            slot.sync = to;
            true
        } else {
            false
        }
    }

    /// Copy of the current tree.
    pub fn snapshot(&self) -> PhyloTree {
        self.lock().tree.clone()
    }
}

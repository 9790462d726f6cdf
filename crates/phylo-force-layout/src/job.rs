//! The physics job: steps a [`ParticleSystem`] on a worker thread and
//! publishes positions into the shared tree.

use std::time::Instant;

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::dispatcher::{Job, JobOutcome};
use crate::params::PublishCadence;
use crate::particle::ParticleSystem;
use crate::sync::{SyncState, TreeHandle};

pub struct ForceJob {
    system: ParticleSystem,
    tree: TreeHandle,
    cadence: PublishCadence,
}

impl ForceJob {
    /// `system` must have been initialized from the tree behind `tree`.
    pub fn new(system: ParticleSystem, tree: TreeHandle, cadence: PublishCadence) -> Self {
        Self {
            system,
            tree,
            cadence,
        }
    }

    /// Publishes unless the UI still owns the last publication. The token
    /// is checked under the lock so a cancelled job never writes after its
    /// owner has reclaimed the tree.
    fn try_publish(&mut self, cancel: &CancellationToken) -> bool {
        let mut slot = self.tree.lock();
        if cancel.is_cancelled() || slot.sync == SyncState::RenderInProgress {
            return false;
        }
        slot.sync = SyncState::NotSynched;
        self.system.update_and_synch(&mut slot.tree);
        slot.sync = SyncState::Refreshed;
        true
    }
}

impl Job for ForceJob {
    fn name(&self) -> &str {
        "force-layout"
    }

    fn run(&mut self, cancel: &CancellationToken) -> JobOutcome {
        {
            let mut slot = self.tree.lock();
            self.system.update_and_synch(&mut slot.tree);
            slot.sync = SyncState::RenderInProgress;
        }

        let budget = self.cadence.batch_budget();
        let mut since_publish = 0u32;
        let mut publications = 0u32;
        let mut converged = false;
        let mut batches = 0u32;

        while batches < self.cadence.max_batches && !cancel.is_cancelled() {
            batches += 1;
            let started = Instant::now();
            loop {
                self.system.update();
                since_publish += 1;
                if cancel.is_cancelled() || started.elapsed() >= budget {
                    break;
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            if since_publish > self.cadence.min_updates_between_publish && self.try_publish(cancel) {
                since_publish = 0;
                publications += 1;
            }

            if self.system.is_done() {
                converged = true;
                cancel.cancel();
            }
        }

        let exhausted = batches >= self.cadence.max_batches;
        let outcome = if converged || (exhausted && !cancel.is_cancelled()) {
            JobOutcome::Completed
        } else {
            JobOutcome::Canceled
        };
        info!(
            ?outcome,
            batches,
            publications,
            converged,
            max_velocity = self.system.max_velocity(),
            "force layout job finished"
        );
        debug!(particles = self.system.len(), adaptive_step = self.system.adaptive_step());
        outcome
    }
}

//! Layout controller.
//!
//! Owns the shared tree and the life cycle of at most one physics job. The
//! host drives it from its event loop:
//!
//! ```text
//! controller.layout(now)?;
//! loop {
//!     controller.process_events(Instant::now()); // notifications + poll timer
//!     controller.render(|tree| draw(tree));        // consume a publication
//! }
//! ```
//!
//! With a [`JobDispatcher`] the simulation runs on a worker thread and the
//! poll timer picks up publications. Without one (or once the dispatcher
//! has refused work) the simulation runs synchronously inside `layout`.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use phylo_force_core::{
    radial_layout, BoundaryCalculator, BoundaryReport, PhyloTree, ViewingLimits,
};
use tracing::{debug, info, warn};

use crate::dispatcher::{JobDispatcher, JobId, JobNotification, JobState};
use crate::error::{DispatchError, Result};
use crate::job::ForceJob;
use crate::params::{ControllerConfig, PhysicsParams};
use crate::particle::{ParticleSystem, SharedParams};
use crate::sync::{SyncState, TreeHandle};
use crate::timer::PollTimer;

/// Trees with at most this many visible nodes skip the simulation.
pub const DEGENERATE_NODE_COUNT: usize = 2;

/// Rendering surface notified after every boundary recomputation.
pub trait LayoutHost {
    fn update_limits(&mut self, limits: &ViewingLimits, boundaries: &BoundaryReport);
}

impl<F> LayoutHost for F
where
    F: FnMut(&ViewingLimits, &BoundaryReport),
{
    fn update_limits(&mut self, limits: &ViewingLimits, boundaries: &BoundaryReport) {
        self(limits, boundaries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Threaded,
    SingleThread,
}

/// What [`ForceLayoutController::layout`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOutcome {
    /// Too few nodes to simulate; limits were set from the node bounds.
    Degenerate,
    /// A background job was started.
    Started(JobId),
    /// The synchronous simulation ran to completion.
    Completed,
}

pub struct ForceLayoutController<H: LayoutHost> {
    config: ControllerConfig,
    host: H,
    tree: TreeHandle,
    dispatcher: Option<Arc<JobDispatcher>>,
    job: Option<JobId>,
    notify_tx: Sender<JobNotification>,
    notify_rx: Receiver<JobNotification>,
    timer: PollTimer,
    params: SharedParams,
    fallback: Option<ParticleSystem>,
    boundaries: BoundaryCalculator,
    last_limits: Option<ViewingLimits>,
    last_report: Option<BoundaryReport>,
}

impl<H: LayoutHost> ForceLayoutController<H> {
    /// Threaded mode when `dispatcher` is given, single-thread otherwise.
    pub fn new(
        tree: PhyloTree,
        host: H,
        config: ControllerConfig,
        dispatcher: Option<Arc<JobDispatcher>>,
    ) -> Result<Self> {
        config.validate()?;
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            timer: PollTimer::new(config.poll_interval()),
            params: Arc::new(Mutex::new(config.physics)),
            boundaries: BoundaryCalculator::new(config.boundary_padding),
            config,
            host,
            tree: TreeHandle::new(tree),
            dispatcher,
            job: None,
            notify_tx,
            notify_rx,
            fallback: None,
            last_limits: None,
            last_report: None,
        })
    }

    pub fn mode(&self) -> LayoutMode {
        if self.dispatcher.is_some() {
            LayoutMode::Threaded
        } else {
            LayoutMode::SingleThread
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn tree_handle(&self) -> &TreeHandle {
        &self.tree
    }

    pub fn snapshot(&self) -> PhyloTree {
        self.tree.snapshot()
    }

    pub fn sync_state(&self) -> SyncState {
        self.tree.sync_state()
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job
    }

    /// State of the current job; `Invalid` when there is none.
    pub fn job_state(&self) -> JobState {
        match (&self.dispatcher, self.job) {
            (Some(dispatcher), Some(id)) => dispatcher.job_state(id),
            _ => JobState::Invalid,
        }
    }

    pub fn is_running(&self) -> bool {
        self.job_state() == JobState::Running
    }

    pub fn last_limits(&self) -> Option<&ViewingLimits> {
        self.last_limits.as_ref()
    }

    pub fn last_boundaries(&self) -> Option<&BoundaryReport> {
        self.last_report.as_ref()
    }

    pub fn physics_params(&self) -> PhysicsParams {
        *self.params.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies to the running job at its next publication and to every
    /// later layout request.
    pub fn set_physics_params(&mut self, params: PhysicsParams) -> Result<()> {
        params.validate()?;
        *self.params.lock().unwrap_or_else(|e| e.into_inner()) = params;
        if let Some(system) = &self.fallback {
            system.set_params(self.fallback_params(params));
        }
        Ok(())
    }

    fn fallback_params(&self, mut params: PhysicsParams) -> PhysicsParams {
        if let Some(k) = self.config.fallback.velocity_threshold_k {
            params.velocity_threshold_k = k;
        }
        params
    }

    /// Seeds positions with the radial layout and starts the simulation.
    ///
    /// Any previous job is stopped first. In threaded mode a dispatcher that
    /// refuses work switches the controller to single-thread mode for good.
    pub fn layout(&mut self, now: Instant) -> Result<LayoutOutcome> {
        self.stop_layout();

        let (visible, node_bounds) = {
            let mut slot = self.tree.lock();
            radial_layout(&mut slot.tree, &self.config.radial);
            slot.sync = SyncState::Synched;
            (slot.tree.visible_node_count(), slot.tree.bound_rect())
        };

        if visible <= DEGENERATE_NODE_COUNT {
            debug!(visible, "tree too small to simulate");
            self.tree.set_sync_state(SyncState::RenderInProgress);
            let limits = ViewingLimits::degenerate(node_bounds, self.config.degenerate_margin);
            let report = self.boundaries.calculate(&self.tree.lock().tree);
            self.publish_limits(limits, report);
            return Ok(LayoutOutcome::Degenerate);
        }

        if let Some(dispatcher) = self.dispatcher.clone() {
            match self.start_job(&dispatcher, now) {
                Ok(id) => return Ok(LayoutOutcome::Started(id)),
                Err(e) if e.is_resource_exhausted() => {
                    warn!(error = %e, "dispatcher refused the layout job; switching to single-thread layout");
                    self.dispatcher = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.run_fallback();
        Ok(LayoutOutcome::Completed)
    }

    fn start_job(
        &mut self,
        dispatcher: &JobDispatcher,
        now: Instant,
    ) -> std::result::Result<JobId, DispatchError> {
        let system = {
            let slot = self.tree.lock();
            ParticleSystem::with_shared_params(&slot.tree, Arc::clone(&self.params))
        };
        let particles = system.len();
        let job = ForceJob::new(system, self.tree.clone(), self.config.cadence);
        let id = dispatcher.start_job(
            Box::new(job),
            &self.config.pool_name,
            self.notify_tx.clone(),
            self.config.job_priority,
            true,
        )?;
        self.job = Some(id);
        self.timer.start(now);
        info!(job = ?id, particles, pool = %self.config.pool_name, "force layout started");
        Ok(id)
    }

    fn run_fallback(&mut self) {
        let params = self.fallback_params(self.physics_params());
        let mut system = match self.fallback.take() {
            Some(mut system) => {
                system.set_params(params);
                system.init(&self.tree.lock().tree);
                system
            }
            None => ParticleSystem::new(&self.tree.lock().tree, params),
        };

        let fallback = self.config.fallback;
        let mut batches = 0;
        {
            let mut slot = self.tree.lock();
            while batches < fallback.max_batches && !system.is_done() {
                for _ in 0..fallback.steps_per_batch {
                    system.update();
                }
                system.update_and_synch(&mut slot.tree);
                batches += 1;
            }
            slot.sync = SyncState::RenderInProgress;
        }
        info!(
            batches,
            converged = system.is_done(),
            max_velocity = system.max_velocity(),
            "single-thread layout finished"
        );
        self.fallback = Some(system);
        self.refresh_limits();
    }

    /// Pumps job notifications and ticks the poll timer.
    pub fn process_events(&mut self, now: Instant) {
        while let Ok(note) = self.notify_rx.try_recv() {
            self.on_job_notification(note);
        }
        if self.timer.poll(now) {
            self.on_timer();
        }
    }

    /// Time until the poll timer wants to run again.
    pub fn next_poll(&self, now: Instant) -> Option<Duration> {
        self.timer.remaining(now)
    }

    fn on_timer(&mut self) {
        if self.job_state() != JobState::Running {
            return;
        }
        // Leave the state at RenderInProgress until `render` runs: the
        // worker may not publish again before the UI has drawn this one.
        if self
            .tree
            .transition(SyncState::Refreshed, SyncState::RenderInProgress)
        {
            self.refresh_limits();
        }
    }

    fn on_job_notification(&mut self, note: JobNotification) {
        if note.state == JobState::Running {
            return;
        }
        if Some(note.job_id) != self.job {
            debug!(job = ?note.job_id, state = ?note.state, "ignoring notification for a replaced job");
            return;
        }
        self.timer.stop();
        self.job = None;
        info!(job = ?note.job_id, state = ?note.state, "force layout job ended");
        if note.state == JobState::Completed {
            self.tree.set_sync_state(SyncState::RenderInProgress);
            self.refresh_limits();
        }
    }

    fn refresh_limits(&mut self) {
        let report = self.boundaries.calculate(&self.tree.lock().tree);
        let limits = ViewingLimits::from_extents(&report.extents, &self.config.margins);
        self.publish_limits(limits, report);
    }

    fn publish_limits(&mut self, limits: ViewingLimits, report: BoundaryReport) {
        self.host.update_limits(&limits, &report);
        self.last_limits = Some(limits);
        self.last_report = Some(report);
    }

    /// Runs `draw` on the tree if a publication is reserved for the UI, then
    /// releases it to the worker. Returns whether `draw` ran.
    pub fn render<F: FnOnce(&PhyloTree)>(&self, draw: F) -> bool {
        let mut slot = self.tree.lock();
        if slot.sync != SyncState::RenderInProgress {
            return false;
        }
        draw(&slot.tree);
        slot.sync = SyncState::Synched;
        true
    }

    /// Stops the simulation and gives `edit` exclusive access to the tree,
    /// including its topology. Call [`layout`](Self::layout) afterwards.
    pub fn edit_tree<R>(&mut self, edit: impl FnOnce(&mut PhyloTree) -> R) -> R {
        self.stop_layout();
        self.fallback = None;
        let mut slot = self.tree.lock();
        slot.sync = SyncState::Synched;
        edit(&mut slot.tree)
    }

    /// Drives the controller until the current job ends or `timeout` passes,
    /// rendering every publication with `draw`. Returns whether it ended.
    pub fn wait_for_completion<F: FnMut(&PhyloTree)>(
        &mut self,
        timeout: Duration,
        mut draw: F,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            self.process_events(now);
            self.render(&mut draw);
            if self.job.is_none() {
                return true;
            }
            if now >= deadline {
                return false;
            }
            let nap = self
                .next_poll(now)
                .unwrap_or(Duration::from_millis(10))
                .min(Duration::from_millis(10));
            thread::sleep(nap);
        }
    }

    /// Cancels and deletes the current job. Idempotent.
    ///
    /// Waits a bounded time for a running job to notice the cancellation;
    /// past that the job is deleted anyway. It can no longer publish: the
    /// worker checks its token under the tree lock.
    pub fn stop_layout(&mut self) {
        self.timer.stop();
        let Some(id) = self.job.take() else {
            return;
        };
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            return;
        };

        if dispatcher.job_state(id) == JobState::Running {
            if let Err(e) = dispatcher.cancel_job(id) {
                debug!(job = ?id, error = %e, "cancel on a finished job");
            }
            let mut attempts = 0;
            while dispatcher.job_state(id) == JobState::Running
                && attempts < self.config.stop_wait_attempts
            {
                thread::sleep(self.config.stop_wait_interval());
                attempts += 1;
            }
            if dispatcher.job_state(id) == JobState::Running {
                warn!(
                    job = ?id,
                    waited_ms = self.config.stop_wait_interval_ms * u64::from(attempts),
                    "layout job did not stop in time; deleting it anyway"
                );
            }
        }

        match dispatcher.delete_job(id) {
            Ok(()) | Err(DispatchError::UnknownJob(_)) => {}
            Err(e) => warn!(job = ?id, error = %e, "failed to delete layout job"),
        }
        debug!(job = ?id, "layout stopped");
    }
}

impl<H: LayoutHost> Drop for ForceLayoutController<H> {
    fn drop(&mut self) {
        self.stop_layout();
    }
}

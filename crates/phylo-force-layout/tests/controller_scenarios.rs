//! End-to-end controller scenarios in threaded and single-thread mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use phylo_force_core::{radial_layout, BoundaryReport, PhyloTree, RadialParams, ViewingLimits};
use phylo_force_layout::{
    CancellationToken, ControllerConfig, FallbackParams, ForceJob, ForceLayoutController, Job,
    JobDispatcher, JobState, LayoutHost, LayoutMode, LayoutOutcome, ParticleSystem, PhysicsParams,
    PoolConfig, PublishCadence, SyncState, TreeHandle, DEFAULT_POOL,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Default)]
struct Recorder {
    limits: Vec<ViewingLimits>,
}

impl LayoutHost for Recorder {
    fn update_limits(&mut self, limits: &ViewingLimits, _boundaries: &BoundaryReport) {
        self.limits.push(*limits);
    }
}

/// Root with `fan` inner nodes, each holding `leaves` leaves.
fn two_level_tree(fan: usize, leaves: usize) -> PhyloTree {
    let mut tree = PhyloTree::new();
    let root = tree.add_root("root").unwrap();
    for i in 0..fan {
        let inner = tree.add_child(root, format!("inner{i}")).unwrap();
        for j in 0..leaves {
            tree.add_child(inner, format!("leaf{i}_{j}")).unwrap();
        }
    }
    tree
}

/// Spring-only physics that settles without ever throttling the step.
fn settling_config() -> ControllerConfig {
    ControllerConfig {
        physics: PhysicsParams {
            electrical_repulsion: 0.0,
            edge_k: 5.0,
            damping: 0.5,
            velocity_threshold_k: 0.0005,
            ..PhysicsParams::default()
        },
        cadence: PublishCadence {
            batch_budget_ms: 2,
            min_updates_between_publish: 5,
            max_batches: 20_000,
        },
        fallback: FallbackParams {
            max_batches: 5_000,
            steps_per_batch: 10,
            velocity_threshold_k: None,
        },
        poll_interval_ms: 5,
        ..ControllerConfig::default()
    }
}

fn dispatcher() -> Arc<JobDispatcher> {
    Arc::new(JobDispatcher::with_default_pool(2).unwrap())
}

#[test]
fn threaded_and_single_thread_reach_same_fixed_point() {
    init_tracing();
    let tree = two_level_tree(3, 2);

    let mut single =
        ForceLayoutController::new(tree.clone(), Recorder::default(), settling_config(), None).unwrap();
    assert_eq!(single.layout(Instant::now()).unwrap(), LayoutOutcome::Completed);
    let expected = single.snapshot();

    let mut threaded = ForceLayoutController::new(
        tree,
        Recorder::default(),
        settling_config(),
        Some(dispatcher()),
    )
    .unwrap();
    assert_eq!(threaded.mode(), LayoutMode::Threaded);
    assert!(matches!(threaded.layout(Instant::now()).unwrap(), LayoutOutcome::Started(_)));
    assert!(threaded.wait_for_completion(Duration::from_secs(60), |_| {}));
    let actual = threaded.snapshot();

    assert!(!threaded.host().limits.is_empty());
    // Both runs stop somewhere inside the convergence band, so allow a gap
    // of 0.5% of the layout extent.
    let extent = expected.bound_rect();
    let tolerance = 0.005 * extent.width().max(extent.height());
    assert!(tolerance > 0.0);
    let max_gap = expected
        .nodes()
        .zip(actual.nodes())
        .map(|(a, b)| (a.position - b.position).length())
        .fold(0.0f32, f32::max);
    assert!(max_gap <= tolerance, "max gap {max_gap} exceeds {tolerance}");
}

#[test]
fn two_node_tree_skips_physics_in_threaded_mode() {
    init_tracing();
    let mut tree = PhyloTree::new();
    let root = tree.add_root("root").unwrap();
    tree.add_child(root, "leaf").unwrap();

    let mut controller = ForceLayoutController::new(
        tree,
        Recorder::default(),
        ControllerConfig::default(),
        Some(dispatcher()),
    )
    .unwrap();
    assert_eq!(controller.layout(Instant::now()).unwrap(), LayoutOutcome::Degenerate);
    assert_eq!(controller.job_id(), None);

    let snapshot = controller.snapshot();
    let mut expected = snapshot.bound_rect();
    expected.inflate(1.0, 1.0);
    assert_eq!(controller.host().limits.len(), 1);
    assert_eq!(controller.host().limits[0].bounds, expected);
}

#[test]
fn relayout_replaces_running_job() {
    init_tracing();
    let dispatcher = dispatcher();
    let mut controller = ForceLayoutController::new(
        two_level_tree(20, 10),
        Recorder::default(),
        ControllerConfig::default(),
        Some(Arc::clone(&dispatcher)),
    )
    .unwrap();

    let LayoutOutcome::Started(first) = controller.layout(Instant::now()).unwrap() else {
        panic!("expected a background job");
    };
    let LayoutOutcome::Started(second) = controller.layout(Instant::now()).unwrap() else {
        panic!("expected a background job");
    };
    assert_ne!(first, second);
    assert_eq!(dispatcher.job_state(first), JobState::Invalid);
    assert_eq!(controller.job_id(), Some(second));

    // Drive the UI side for a while; every observed state is a valid
    // publication state and positions stay finite.
    let deadline = Instant::now() + Duration::from_millis(600);
    while Instant::now() < deadline {
        controller.process_events(Instant::now());
        controller.render(|tree| {
            assert!(tree.nodes().all(|n| n.position.is_finite()));
        });
        let state = controller.sync_state();
        assert!(matches!(
            state,
            SyncState::NotSynched
                | SyncState::RenderInProgress
                | SyncState::Synched
                | SyncState::Refreshed
        ));
        std::thread::sleep(Duration::from_millis(5));
    }

    controller.stop_layout();
    assert_eq!(controller.job_id(), None);
    assert_eq!(dispatcher.job_state(second), JobState::Invalid);
    assert!(!controller.is_running());
    controller.stop_layout();
}

#[test]
fn cancelled_job_reaches_canceled_within_wait_ceiling() {
    init_tracing();
    let mut tree = two_level_tree(30, 10);
    radial_layout(&mut tree, &RadialParams::default());
    let system = ParticleSystem::new(&tree, PhysicsParams::default());
    let handle = TreeHandle::new(tree);
    let job = ForceJob::new(system, handle.clone(), PublishCadence::default());

    let dispatcher = dispatcher();
    let (tx, rx) = unbounded();
    let id = dispatcher.start_job(Box::new(job), DEFAULT_POOL, tx, 1, false).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(dispatcher.job_state(id), JobState::Running);

    let config = ControllerConfig::default();
    let ceiling = config.stop_wait_interval() * config.stop_wait_attempts;
    dispatcher.cancel_job(id).unwrap();
    let note = rx.recv_timeout(ceiling).expect("job did not stop in time");
    assert_eq!(note.job_id, id);
    assert_eq!(note.state, JobState::Canceled);
    assert_eq!(dispatcher.job_state(id), JobState::Canceled);
    assert_ne!(handle.sync_state(), SyncState::NotSynched);
}

#[test]
fn refused_job_falls_back_to_single_thread() {
    init_tracing();
    let dispatcher = JobDispatcher::new();
    dispatcher
        .add_pool(
            DEFAULT_POOL,
            PoolConfig {
                threads: 1,
                queue_capacity: 0,
            },
        )
        .unwrap();

    let mut controller = ForceLayoutController::new(
        two_level_tree(3, 3),
        Recorder::default(),
        ControllerConfig::default(),
        Some(Arc::new(dispatcher)),
    )
    .unwrap();
    assert_eq!(controller.layout(Instant::now()).unwrap(), LayoutOutcome::Completed);
    assert_eq!(controller.mode(), LayoutMode::SingleThread);
    assert_eq!(controller.host().limits.len(), 1);
    assert!(controller.render(|_| {}));

    // Later requests stay single-threaded.
    assert_eq!(controller.layout(Instant::now()).unwrap(), LayoutOutcome::Completed);
}

#[test]
fn tuned_params_survive_relayout() {
    init_tracing();
    let mut controller = ForceLayoutController::new(
        two_level_tree(4, 4),
        Recorder::default(),
        ControllerConfig::default(),
        Some(dispatcher()),
    )
    .unwrap();
    controller.layout(Instant::now()).unwrap();
    let tuned = PhysicsParams {
        damping: 0.7,
        edge_k: 100.0,
        ..PhysicsParams::default()
    };
    controller.set_physics_params(tuned).unwrap();
    controller.layout(Instant::now()).unwrap();
    assert_eq!(controller.physics_params(), tuned);
    controller.stop_layout();
}

#[test]
fn edit_tree_stops_layout_and_allows_topology_changes() {
    init_tracing();
    let mut controller = ForceLayoutController::new(
        two_level_tree(5, 5),
        Recorder::default(),
        ControllerConfig::default(),
        Some(dispatcher()),
    )
    .unwrap();
    controller.layout(Instant::now()).unwrap();
    let added = controller.edit_tree(|tree| {
        let root = tree.root().unwrap();
        tree.add_child(root, "late").unwrap()
    });
    assert!(!controller.is_running());
    assert_eq!(controller.snapshot()[added].label, "late");
    assert!(matches!(controller.layout(Instant::now()).unwrap(), LayoutOutcome::Started(_)));
}

struct Never;

impl Job for Never {
    fn run(&mut self, cancel: &CancellationToken) -> phylo_force_layout::JobOutcome {
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(1));
        }
        phylo_force_layout::JobOutcome::Canceled
    }
}

#[test]
fn dropping_controller_cancels_its_job() {
    init_tracing();
    let dispatcher = dispatcher();
    let id = {
        let mut controller = ForceLayoutController::new(
            two_level_tree(10, 10),
            Recorder::default(),
            ControllerConfig::default(),
            Some(Arc::clone(&dispatcher)),
        )
        .unwrap();
        let LayoutOutcome::Started(id) = controller.layout(Instant::now()).unwrap() else {
            panic!("expected a background job");
        };
        id
    };
    assert_eq!(dispatcher.job_state(id), JobState::Invalid);

    // The pool is free again for other work.
    let (tx, rx) = unbounded();
    let other = dispatcher.start_job(Box::new(Never), DEFAULT_POOL, tx, 0, false).unwrap();
    dispatcher.cancel_job(other).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().state, JobState::Canceled);
}

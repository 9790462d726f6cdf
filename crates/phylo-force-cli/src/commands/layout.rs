//! Layout command implementation.
//!
//! Loads a tree document, runs the force-directed layout to completion (or
//! until the timeout) and writes the final positions, viewing limits and
//! subtree boundaries as JSON.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use phylo_force_core::{
    document, BoundaryReport, PhyloTree, Rect, Traverse, Vec2, ViewingLimits, Visit,
};
use phylo_force_layout::{
    ControllerConfig, ForceLayoutController, JobDispatcher, LayoutHost, LayoutOutcome, PoolConfig,
};

use crate::config::{load_controller_config, resolve_threads};

/// Options for `phyforce layout`.
#[derive(Debug, Clone)]
pub struct LayoutArgs {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub threads: Option<usize>,
    pub timeout_secs: u64,
}

/// Receives viewing-limit updates while the layout runs.
#[derive(Debug, Default)]
pub struct CliHost {
    pub updates: usize,
}

impl LayoutHost for CliHost {
    fn update_limits(&mut self, limits: &ViewingLimits, boundaries: &BoundaryReport) {
        self.updates += 1;
        debug!(
            update = self.updates,
            width = limits.bounds.width(),
            height = limits.bounds.height(),
            boundaries = boundaries.boundaries.len(),
            "viewing limits updated"
        );
    }
}

#[derive(Debug, Serialize)]
pub struct NodePosition {
    pub id: u32,
    pub label: String,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

#[derive(Debug, Serialize)]
pub struct BoundaryEntry {
    pub node: u32,
    pub rect: Rect,
    pub hull: Vec<Vec2>,
}

/// JSON written by the layout command.
#[derive(Debug, Serialize)]
pub struct LayoutReport {
    pub mode: String,
    pub outcome: String,
    pub finished: bool,
    pub limit_updates: usize,
    pub nodes: Vec<NodePosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ViewingLimits>,
    pub boundaries: Vec<BoundaryEntry>,
}

fn visible_positions(tree: &PhyloTree) -> Vec<NodePosition> {
    let mut nodes = Vec::with_capacity(tree.len());
    tree.depth_first(|tree, id, visit| {
        if visit != Visit::Leave {
            let node = &tree[id];
            nodes.push(NodePosition {
                id: id.0,
                label: node.label.clone(),
                x: node.position.x,
                y: node.position.y,
                angle: node.angle,
            });
        }
        Traverse::Continue
    });
    nodes
}

fn build_dispatcher(
    config: &ControllerConfig,
    threads: usize,
) -> Result<Option<Arc<JobDispatcher>>> {
    if threads == 0 {
        return Ok(None);
    }
    let dispatcher = JobDispatcher::new();
    dispatcher
        .add_pool(
            &config.pool_name,
            PoolConfig {
                threads,
                ..PoolConfig::default()
            },
        )
        .context("Failed to start layout worker pool")?;
    Ok(Some(Arc::new(dispatcher)))
}

/// Execute the layout command.
pub fn execute(args: &LayoutArgs) -> Result<LayoutReport> {
    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open tree file {}", args.input.display()))?;
    let tree = document::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid tree file {}", args.input.display()))?;
    let config = load_controller_config(args.config.as_deref())?;
    let threads = resolve_threads(args.threads)?;
    info!(nodes = tree.len(), threads, "starting layout");

    let dispatcher = build_dispatcher(&config, threads)?;
    let mut controller = ForceLayoutController::new(tree, CliHost::default(), config, dispatcher)?;
    let started = Instant::now();
    let outcome = controller.layout(started)?;

    let finished = match outcome {
        LayoutOutcome::Started(job) => {
            debug!(?job, "waiting for background layout");
            let done = controller
                .wait_for_completion(Duration::from_secs(args.timeout_secs), |_| {});
            if !done {
                warn!(
                    timeout_secs = args.timeout_secs,
                    "layout did not finish in time; reporting last published positions"
                );
                controller.stop_layout();
            }
            done
        }
        LayoutOutcome::Degenerate | LayoutOutcome::Completed => true,
    };
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        finished, "layout finished"
    );

    let tree = controller.snapshot();
    let report = LayoutReport {
        mode: format!("{:?}", controller.mode()),
        outcome: match outcome {
            LayoutOutcome::Degenerate => "degenerate".to_string(),
            LayoutOutcome::Started(_) if finished => "finished".to_string(),
            LayoutOutcome::Started(_) => "timed_out".to_string(),
            LayoutOutcome::Completed => "completed".to_string(),
        },
        finished,
        limit_updates: controller.host().updates,
        nodes: visible_positions(&tree),
        limits: controller.last_limits().copied(),
        boundaries: controller
            .last_boundaries()
            .map(|report| {
                report
                    .boundaries
                    .iter()
                    .map(|(id, boundary)| BoundaryEntry {
                        node: id.0,
                        rect: boundary.rect,
                        hull: boundary.hull.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    };

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "layout written");
        }
        None => println!("{json}"),
    }
    Ok(report)
}

//! Generate command implementation.
//!
//! Produces a random tree document by uniform attachment: node `i` picks
//! its parent among nodes `0..i`. Expected depth grows logarithmically.
//! Documents are reproducible for a given seed.

use std::path::PathBuf;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use phylo_force_core::NodeSpec;

/// Options for `phyforce generate`.
#[derive(Debug, Clone)]
pub struct GenerateArgs {
    pub nodes: usize,
    pub seed: u64,
    /// Mark every k-th inner node as bounded.
    pub bounded_every: Option<usize>,
    pub output: Option<PathBuf>,
}

/// Builds a random document with `nodes` nodes.
pub fn generate_document(nodes: usize, seed: u64, bounded_every: Option<usize>) -> Result<NodeSpec> {
    if nodes == 0 {
        bail!("A tree needs at least one node");
    }
    if bounded_every == Some(0) {
        bail!("--bounded-every must be at least 1");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes];
    let mut distances = vec![0.0f32; nodes];
    for i in 1..nodes {
        let parent = rng.gen_range(0..i);
        children[parent].push(i);
        distances[i] = rng.gen_range(0.05..1.05);
    }

    // Children always have larger indices than their parent, so a reverse
    // sweep sees every subtree complete before its parent.
    let mut built: Vec<Option<NodeSpec>> = vec![None; nodes];
    let mut inner_seen = 0usize;
    for i in (0..nodes).rev() {
        let is_inner = !children[i].is_empty();
        let label = if is_inner {
            format!("n{i}")
        } else {
            format!("taxon_{i}")
        };
        let mut spec = NodeSpec::leaf(label);
        spec.distance = distances[i];
        spec.label_size = Some([8.0 * spec.label.len() as f32, 12.0]);
        spec.children = children[i]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        if is_inner {
            inner_seen += 1;
            if let Some(k) = bounded_every {
                spec.bounded = inner_seen % k == 0;
            }
        }
        built[i] = Some(spec);
    }

    match built[0].take() {
        Some(root) => Ok(root),
        None => bail!("Generated tree lost its root"),
    }
}

/// Execute the generate command: write a document to `output` or stdout.
pub fn execute(args: &GenerateArgs) -> Result<()> {
    let document = generate_document(args.nodes, args.seed, args.bounded_every)?;
    let json = serde_json::to_string(&document)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(nodes = args.nodes, path = %path.display(), "tree document written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

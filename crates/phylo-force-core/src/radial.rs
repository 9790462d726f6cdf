//! Radial seed layout.
//!
//! Places the root at the origin and gives every visible leaf an equal
//! angular wedge; interior nodes sit at the middle of the wedge spanned by
//! their leaves. This is cheap and deterministic, which makes it a good
//! starting point for the force simulation.

use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::geometry::Vec2;
use crate::tree::{PhyloTree, Traverse, Visit};

/// Parameters for [`radial_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialParams {
    /// Radius added per tree level (or per unit of branch length).
    pub radius_step: f32,
    /// Use branch distances instead of depth for the radius.
    pub use_distances: bool,
    /// Angle of the first leaf wedge, in radians.
    pub start_angle: f32,
    /// Total angle shared by all leaves, in radians.
    pub angular_span: f32,
}

impl Default for RadialParams {
    fn default() -> Self {
        Self {
            radius_step: 100.0,
            use_distances: false,
            start_angle: 0.0,
            angular_span: TAU,
        }
    }
}

/// Computes seed positions for all visible nodes and returns the visible
/// leaf count.
pub fn radial_layout(tree: &mut PhyloTree, params: &RadialParams) -> usize {
    let Some(root) = tree.root() else {
        return 0;
    };

    let mut leaves = vec![0usize; tree.len()];
    tree.depth_first(|tree, id, visit| {
        match visit {
            Visit::Enter => {}
            Visit::Leaf | Visit::Leave => {
                if visit == Visit::Leaf {
                    leaves[id.index()] = 1;
                }
                if let Some(parent) = tree[id].parent() {
                    leaves[parent.index()] += leaves[id.index()];
                }
            }
        }
        Traverse::Continue
    });

    let total = leaves[root.index()].max(1) as f32;
    let mut next_start = vec![0.0f32; tree.len()];
    let mut radius = vec![0.0f32; tree.len()];
    let mut depth = 0usize;

    tree.depth_first_mut(|tree, id, visit| {
        if visit == Visit::Leave {
            depth -= 1;
            return Traverse::Continue;
        }

        let width = leaves[id.index()] as f32 / total * params.angular_span;
        let (start, r, parent_pos) = match tree[id].parent() {
            Some(parent) => {
                let start = next_start[parent.index()];
                next_start[parent.index()] += width;
                let r = if params.use_distances {
                    radius[parent.index()] + tree[id].distance.max(0.0) * params.radius_step
                } else {
                    depth as f32 * params.radius_step
                };
                (start, r, Some(tree[parent].position))
            }
            None => (params.start_angle, 0.0, None),
        };
        next_start[id.index()] = start;
        radius[id.index()] = r;

        let theta = start + width * 0.5;
        let node = &mut tree[id];
        node.position = Vec2::new(r * theta.cos(), r * theta.sin());
        node.angle = match parent_pos {
            Some(p) if node.position.x < p.x => PI,
            _ => 0.0,
        };

        if visit == Visit::Enter {
            depth += 1;
        }
        Traverse::Continue
    });

    leaves[root.index()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeId;

    fn star(children: usize) -> (PhyloTree, NodeId) {
        let mut tree = PhyloTree::new();
        let root = tree.add_root("root").unwrap();
        for i in 0..children {
            tree.add_child(root, format!("leaf{i}")).unwrap();
        }
        (tree, root)
    }

    #[test]
    fn test_star_leaves_on_circle() {
        let (mut tree, root) = star(4);
        let leaves = radial_layout(&mut tree, &RadialParams::default());
        assert_eq!(leaves, 4);
        assert_eq!(tree[root].position, Vec2::ZERO);
        for node in tree.nodes().skip(1) {
            assert!((node.position.length() - 100.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_positions_are_distinct() {
        let mut tree = PhyloTree::new();
        let root = tree.add_root("r").unwrap();
        let a = tree.add_child(root, "a").unwrap();
        let b = tree.add_child(root, "b").unwrap();
        for i in 0..3 {
            tree.add_child(a, format!("a{i}")).unwrap();
            tree.add_child(b, format!("b{i}")).unwrap();
        }
        radial_layout(&mut tree, &RadialParams::default());
        let positions: Vec<Vec2> = tree.nodes().map(|n| n.position).collect();
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                assert!((positions[i] - positions[j]).length() > 1.0);
            }
        }
    }

    #[test]
    fn test_distance_mode_uses_branch_lengths() {
        let mut tree = PhyloTree::new();
        let root = tree.add_root("r").unwrap();
        let a = tree.add_child(root, "a").unwrap();
        tree[a].distance = 2.5;
        let params = RadialParams {
            use_distances: true,
            radius_step: 10.0,
            ..RadialParams::default()
        };
        radial_layout(&mut tree, &params);
        assert!((tree[a].position.length() - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_tree_is_noop() {
        let mut tree = PhyloTree::new();
        assert_eq!(radial_layout(&mut tree, &RadialParams::default()), 0);
    }
}

//! Subtree boundary regions.
//!
//! [`BoundaryCalculator`] walks the tree once with an explicit stack of
//! accumulator frames. Each frame collects the points of a subtree; a
//! frame is merged into its parent only while the walk is nested inside a
//! bounded-display node, so unbounded parts of the tree never pay for
//! point aggregation. Every bounded-display node gets a [`SubtreeBoundary`]
//! built from the points of its whole visible subtree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{Rect, Vec2};
use crate::limits::TreeExtents;
use crate::tree::{NodeId, PhyloNode, PhyloTree, Traverse, Visit};

/// Points accumulated for one subtree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryPoints {
    /// Node positions.
    pub graph_points: Vec<Vec2>,
    /// Label rectangles in model coordinates.
    pub label_rects: Vec<Rect>,
}

impl BoundaryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node's own position and label rectangle.
    pub fn add_node(&mut self, node: &PhyloNode) {
        self.graph_points.push(node.position);
        if let Some(label) = node.label_rect() {
            self.label_rects.push(label.translated(node.position));
        }
    }

    /// Moves all points of `other` into `self`. Point order is not kept.
    pub fn absorb(&mut self, mut other: BoundaryPoints) {
        // Append the smaller side so long chains stay linear.
        if self.graph_points.len() < other.graph_points.len() {
            std::mem::swap(&mut self.graph_points, &mut other.graph_points);
        }
        if self.label_rects.len() < other.label_rects.len() {
            std::mem::swap(&mut self.label_rects, &mut other.label_rects);
        }
        self.graph_points.append(&mut other.graph_points);
        self.label_rects.append(&mut other.label_rects);
    }

    pub fn is_empty(&self) -> bool {
        self.graph_points.is_empty() && self.label_rects.is_empty()
    }

    fn all_points(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.graph_points
            .iter()
            .copied()
            .chain(self.label_rects.iter().flat_map(|r| r.corners()))
    }
}

/// Visual region enclosing a bounded-display subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtreeBoundary {
    /// Convex hull in counter-clockwise order.
    pub hull: Vec<Vec2>,
    /// Axis-aligned bounds of the hull.
    pub rect: Rect,
}

impl SubtreeBoundary {
    /// Padded convex hull of `points`.
    pub fn from_points(points: &BoundaryPoints, padding: f32) -> Self {
        let pad = padding.max(0.0);
        let mut candidates: Vec<Vec2> = if pad > 0.0 {
            points
                .all_points()
                .flat_map(|p| {
                    [
                        Vec2::new(p.x - pad, p.y - pad),
                        Vec2::new(p.x + pad, p.y - pad),
                        Vec2::new(p.x + pad, p.y + pad),
                        Vec2::new(p.x - pad, p.y + pad),
                    ]
                })
                .collect()
        } else {
            points.all_points().collect()
        };
        let hull = convex_hull(&mut candidates);
        let rect = Rect::from_points(hull.iter().copied());
        Self { hull, rect }
    }
}

/// Andrew's monotone chain. Sorts `points` in place.
fn convex_hull(points: &mut Vec<Vec2>) -> Vec<Vec2> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points.clone();
    }

    let mut hull: Vec<Vec2> = Vec::with_capacity(points.len() * 2);
    for &p in points.iter() {
        while hull.len() >= 2 && hull[hull.len() - 2].cross(hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && hull[hull.len() - 2].cross(hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Result of a boundary pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryReport {
    pub boundaries: BTreeMap<NodeId, SubtreeBoundary>,
    pub extents: TreeExtents,
}

/// Computes subtree boundaries and tree extents without recursion.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryCalculator {
    padding: f32,
}

impl Default for BoundaryCalculator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PADDING)
    }
}

impl BoundaryCalculator {
    pub const DEFAULT_PADDING: f32 = 5.0;

    pub fn new(padding: f32) -> Self {
        Self { padding }
    }

    pub fn padding(&self) -> f32 {
        self.padding
    }

    pub fn calculate(&self, tree: &PhyloTree) -> BoundaryReport {
        let mut report = BoundaryReport::default();
        // Bottom frame collects nothing useful; it keeps `last_mut` total.
        let mut frames: Vec<BoundaryPoints> = vec![BoundaryPoints::new()];
        let mut bounded_depth = 0usize;

        tree.depth_first(|tree, id, visit| {
            let node = &tree[id];
            match visit {
                Visit::Enter => {
                    report.extents.include_node(node);
                    if node.is_bounded() {
                        bounded_depth += 1;
                    }
                    frames.push(BoundaryPoints::new());
                }
                Visit::Leaf => {
                    report.extents.include_node(node);
                    if node.is_bounded() {
                        bounded_depth += 1;
                    }
                    let mut points = BoundaryPoints::new();
                    self.finish_node(node, &mut points, &mut report, &mut bounded_depth);
                    if bounded_depth > 0 {
                        if let Some(top) = frames.last_mut() {
                            top.absorb(points);
                        }
                    }
                }
                Visit::Leave => {
                    let mut points = frames.pop().unwrap_or_default();
                    self.finish_node(node, &mut points, &mut report, &mut bounded_depth);
                    if bounded_depth > 0 {
                        if let Some(top) = frames.last_mut() {
                            top.absorb(points);
                        }
                    }
                }
            }
            Traverse::Continue
        });

        report
    }

    fn finish_node(
        &self,
        node: &PhyloNode,
        points: &mut BoundaryPoints,
        report: &mut BoundaryReport,
        bounded_depth: &mut usize,
    ) {
        points.add_node(node);
        if node.is_bounded() {
            report
                .boundaries
                .insert(node.id(), SubtreeBoundary::from_points(points, self.padding));
            *bounded_depth -= 1;
        }
    }
}

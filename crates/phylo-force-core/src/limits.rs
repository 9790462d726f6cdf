//! Tree extents and the viewing rectangle handed to the renderer.

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::tree::PhyloNode;

/// Extents of the visible tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeExtents {
    /// Bounds of node positions only.
    pub nodes: Rect,
    /// Bounds of node positions and label rectangles.
    pub with_labels: Rect,
    /// Number of visible nodes that contributed.
    pub node_count: usize,
}

impl TreeExtents {
    pub fn include_node(&mut self, node: &PhyloNode) {
        self.nodes.include_point(node.position);
        self.with_labels.include_point(node.position);
        if let Some(label) = node.label_rect() {
            self.with_labels.include_rect(&label.translated(node.position));
        }
        self.node_count += 1;
    }
}

/// Margins and aspect policy for [`ViewingLimits`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewMargins {
    pub horizontal: f32,
    pub vertical: f32,
    pub force_square: bool,
}

impl Default for ViewMargins {
    fn default() -> Self {
        Self {
            horizontal: 10.0,
            vertical: 10.0,
            force_square: false,
        }
    }
}

/// Rectangle the renderer should be able to show.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewingLimits {
    /// Label-inclusive extent, never thinner than one unit.
    pub zoomable: Rect,
    /// `zoomable` plus margins (and squared when requested).
    pub bounds: Rect,
}

impl ViewingLimits {
    /// Limits for a tree that went through the boundary pass.
    pub fn from_extents(extents: &TreeExtents, margins: &ViewMargins) -> Self {
        let mut zoomable = extents.with_labels;
        if zoomable.is_empty() {
            zoomable = Rect::new(-1.0, -1.0, 1.0, 1.0);
        }
        if extents.node_count == 1 {
            zoomable.inflate(1.0, 1.0);
        }
        if zoomable.width() < 1.0 {
            zoomable.inflate(1.0, 0.0);
        }
        if zoomable.height() < 1.0 {
            zoomable.inflate(0.0, 1.0);
        }

        let mut bounds = zoomable;
        bounds.inflate(margins.horizontal.max(0.0), margins.vertical.max(0.0));
        if margins.force_square {
            let w = bounds.width();
            let h = bounds.height();
            if w > h {
                bounds.inflate(0.0, (w - h) * 0.5);
            } else {
                bounds.inflate((h - w) * 0.5, 0.0);
            }
        }
        Self { zoomable, bounds }
    }

    /// Limits for trees too small to simulate: the node bounds grown by `margin`.
    pub fn degenerate(node_bounds: Rect, margin: f32) -> Self {
        let mut rect = if node_bounds.is_empty() {
            Rect::new(0.0, 0.0, 0.0, 0.0)
        } else {
            node_bounds
        };
        rect.inflate(margin, margin);
        Self {
            zoomable: rect,
            bounds: rect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extents(rect: Rect, count: usize) -> TreeExtents {
        TreeExtents {
            nodes: rect,
            with_labels: rect,
            node_count: count,
        }
    }

    #[test]
    fn test_thin_extent_is_inflated() {
        let limits = ViewingLimits::from_extents(
            &extents(Rect::new(0.0, 0.0, 10.0, 0.0), 3),
            &ViewMargins {
                horizontal: 0.0,
                vertical: 0.0,
                force_square: false,
            },
        );
        assert_eq!(limits.zoomable, Rect::new(0.0, -1.0, 10.0, 1.0));
    }

    #[test]
    fn test_margins_and_square() {
        let limits = ViewingLimits::from_extents(
            &extents(Rect::new(0.0, 0.0, 10.0, 4.0), 5),
            &ViewMargins {
                horizontal: 1.0,
                vertical: 1.0,
                force_square: true,
            },
        );
        assert_eq!(limits.bounds.width(), limits.bounds.height());
        assert_eq!(limits.bounds.width(), 12.0);
    }

    #[test]
    fn test_degenerate_margin() {
        let limits = ViewingLimits::degenerate(Rect::new(0.0, 0.0, 3.0, 0.0), 1.0);
        assert_eq!(limits.bounds, Rect::new(-1.0, -1.0, 4.0, 1.0));
    }
}

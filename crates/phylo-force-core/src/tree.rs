//! Arena-backed phylogenetic tree.
//!
//! Nodes are stored in a flat vector and addressed by [`NodeId`]. Topology
//! (parent and children) is only changed through [`PhyloTree::add_root`] and
//! [`PhyloTree::add_child`]; layout code only ever touches positions and
//! angles. Every walk over the tree is iterative so that very deep,
//! unbalanced trees cannot overflow the stack.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};
use crate::geometry::{Rect, Vec2};

/// Gap between a node and its label, in model units.
const LABEL_GAP: f32 = 2.0;

/// Stable identifier of a node within a [`PhyloTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Whether a node draws a boundary around its subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundedDisplay {
    #[default]
    Unbounded,
    Bounded,
}

/// A single node of the tree with its display state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhyloNode {
    id: NodeId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Display label (may be empty).
    pub label: String,
    /// Branch length to the parent.
    pub distance: f32,
    /// Current position in model coordinates.
    pub position: Vec2,
    /// Label direction: 0 when the label sits right of the node, π when left.
    pub angle: f32,
    /// Whether this node contributes a subtree boundary.
    pub bounded_display: BoundedDisplay,
    /// Collapsed nodes hide their subtree and behave as leaves.
    pub collapsed: bool,
    /// Label width and height in model units.
    pub label_size: Vec2,
    /// Free-form feature dictionary.
    pub features: BTreeMap<String, String>,
}

impl PhyloNode {
    fn new(id: NodeId, parent: Option<NodeId>, label: impl Into<String>) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            label: label.into(),
            distance: 0.0,
            position: Vec2::ZERO,
            angle: 0.0,
            bounded_display: BoundedDisplay::Unbounded,
            collapsed: false,
            label_size: Vec2::ZERO,
            features: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// True if the node has no children at all.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if the node is displayed as a leaf (no children, or collapsed).
    pub fn is_visible_leaf(&self) -> bool {
        self.children.is_empty() || self.collapsed
    }

    pub fn is_bounded(&self) -> bool {
        self.bounded_display == BoundedDisplay::Bounded
    }

    /// Label rectangle relative to the node position, if the node has a label.
    pub fn label_rect(&self) -> Option<Rect> {
        if self.label.is_empty() {
            return None;
        }
        let w = self.label_size.x.max(0.0);
        let h = self.label_size.y.max(0.0);
        let half_h = h * 0.5;
        let left_side = self.angle > std::f32::consts::FRAC_PI_2
            && self.angle < 3.0 * std::f32::consts::FRAC_PI_2;
        Some(if left_side {
            Rect::new(-w - LABEL_GAP, -half_h, -LABEL_GAP, half_h)
        } else {
            Rect::new(LABEL_GAP, -half_h, w + LABEL_GAP, half_h)
        })
    }
}

/// Event reported by [`PhyloTree::depth_first`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Entering a node that has visible children.
    Enter,
    /// A node displayed as a leaf (no children or collapsed).
    Leaf,
    /// Leaving a node after all of its children were visited.
    Leave,
}

/// Visitor return value controlling a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traverse {
    Continue,
    Stop,
}

/// An arena of [`PhyloNode`]s with a single root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhyloTree {
    nodes: Vec<PhyloNode>,
    root: Option<NodeId>,
}

impl PhyloTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Total number of nodes, including nodes hidden below collapsed ones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_root(&mut self, label: impl Into<String>) -> TreeResult<NodeId> {
        if let Some(root) = self.root {
            return Err(TreeError::RootAlreadySet { root });
        }
        let id = self.next_id();
        self.nodes.push(PhyloNode::new(id, None, label));
        self.root = Some(id);
        Ok(id)
    }

    pub fn add_child(&mut self, parent: NodeId, label: impl Into<String>) -> TreeResult<NodeId> {
        if self.node(parent).is_none() {
            return Err(TreeError::NodeNotFound { node_id: parent });
        }
        let id = self.next_id();
        self.nodes.push(PhyloNode::new(id, Some(parent), label));
        self.nodes[parent.index()].children.push(id);
        Ok(id)
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    pub fn node(&self, id: NodeId) -> Option<&PhyloNode> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut PhyloNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PhyloNode> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut PhyloNode> {
        self.nodes.iter_mut()
    }

    /// Number of nodes reachable from the root without passing a collapsed node.
    pub fn visible_node_count(&self) -> usize {
        let mut count = 0;
        self.depth_first(|_, _, visit| {
            if visit != Visit::Leave {
                count += 1;
            }
            Traverse::Continue
        });
        count
    }

    /// Bounding rectangle of all visible node positions.
    pub fn bound_rect(&self) -> Rect {
        let mut rect = Rect::EMPTY;
        self.depth_first(|tree, id, visit| {
            if visit != Visit::Leave {
                rect.include_point(tree[id].position);
            }
            Traverse::Continue
        });
        rect
    }

    /// Depth of every visible node (root is 0), indexed by [`NodeId::index`].
    pub fn depths(&self) -> Vec<Option<usize>> {
        let mut depths = vec![None; self.nodes.len()];
        let mut current = 0usize;
        self.depth_first(|_, id, visit| {
            match visit {
                Visit::Enter => {
                    depths[id.index()] = Some(current);
                    current += 1;
                }
                Visit::Leaf => depths[id.index()] = Some(current),
                Visit::Leave => current -= 1,
            }
            Traverse::Continue
        });
        depths
    }

    /// Iterative depth-first walk over the visible tree.
    ///
    /// Nodes with visible children produce `Enter` before and `Leave` after
    /// their subtree; visible leaves produce a single `Leaf`.
    pub fn depth_first<F>(&self, mut visitor: F)
    where
        F: FnMut(&PhyloTree, NodeId, Visit) -> Traverse,
    {
        let Some(root) = self.root else {
            return;
        };
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        if self.nodes[root.index()].is_visible_leaf() {
            visitor(self, root, Visit::Leaf);
            return;
        }
        if visitor(self, root, Visit::Enter) == Traverse::Stop {
            return;
        }
        stack.push((root, 0));
        while let Some(top) = stack.last_mut() {
            let id = top.0;
            let next = self.nodes[id.index()].children.get(top.1).copied();
            top.1 += 1;
            match next {
                Some(child) if self.nodes[child.index()].is_visible_leaf() => {
                    if visitor(self, child, Visit::Leaf) == Traverse::Stop {
                        return;
                    }
                }
                Some(child) => {
                    if visitor(self, child, Visit::Enter) == Traverse::Stop {
                        return;
                    }
                    stack.push((child, 0));
                }
                None => {
                    stack.pop();
                    if visitor(self, id, Visit::Leave) == Traverse::Stop {
                        return;
                    }
                }
            }
        }
    }

    /// Same walk as [`depth_first`](Self::depth_first), but the visitor may
    /// change node display state. It must not change topology.
    pub fn depth_first_mut<F>(&mut self, mut visitor: F)
    where
        F: FnMut(&mut PhyloTree, NodeId, Visit) -> Traverse,
    {
        let Some(root) = self.root else {
            return;
        };
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        if self.nodes[root.index()].is_visible_leaf() {
            visitor(self, root, Visit::Leaf);
            return;
        }
        if visitor(self, root, Visit::Enter) == Traverse::Stop {
            return;
        }
        stack.push((root, 0));
        while let Some(top) = stack.last_mut() {
            let id = top.0;
            let next = self.nodes[id.index()].children.get(top.1).copied();
            top.1 += 1;
            match next {
                Some(child) if self.nodes[child.index()].is_visible_leaf() => {
                    if visitor(self, child, Visit::Leaf) == Traverse::Stop {
                        return;
                    }
                }
                Some(child) => {
                    if visitor(self, child, Visit::Enter) == Traverse::Stop {
                        return;
                    }
                    stack.push((child, 0));
                }
                None => {
                    stack.pop();
                    if visitor(self, id, Visit::Leave) == Traverse::Stop {
                        return;
                    }
                }
            }
        }
    }
}

impl Index<NodeId> for PhyloTree {
    type Output = PhyloNode;

    fn index(&self, id: NodeId) -> &PhyloNode {
        &self.nodes[id.index()]
    }
}

impl IndexMut<NodeId> for PhyloTree {
    fn index_mut(&mut self, id: NodeId) -> &mut PhyloNode {
        &mut self.nodes[id.index()]
    }
}

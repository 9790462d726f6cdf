//! Tree data model shared by the phylo-force workspace.
//!
//! The tree is the data source for the force layout: it owns topology and
//! node display state, provides the radial seed layout, and computes the
//! boundary regions and viewing limits the renderer consumes after every
//! layout publication.

pub mod boundary;
pub mod document;
pub mod error;
pub mod geometry;
pub mod limits;
pub mod radial;
pub mod tree;

pub use boundary::{BoundaryCalculator, BoundaryPoints, BoundaryReport, SubtreeBoundary};
pub use document::NodeSpec;
pub use error::{TreeError, TreeResult};
pub use geometry::{Rect, Vec2};
pub use limits::{TreeExtents, ViewMargins, ViewingLimits};
pub use radial::{radial_layout, RadialParams};
pub use tree::{BoundedDisplay, NodeId, PhyloNode, PhyloTree, Traverse, Visit};

//! Error types for tree construction and loading.

use thiserror::Error;

use crate::tree::NodeId;

/// Result type alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors that can occur while building or loading a tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A node referenced by ID does not exist in the tree.
    #[error("node not found: {node_id:?}")]
    NodeNotFound { node_id: NodeId },

    /// The tree already has a root node.
    #[error("tree already has a root: {root:?}")]
    RootAlreadySet { root: NodeId },

    /// A tree document could not be parsed.
    #[error("invalid tree document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

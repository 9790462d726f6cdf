//! JSON tree documents.
//!
//! A document is a nested node record:
//!
//! ```json
//! { "label": "root", "children": [ { "label": "a", "distance": 0.5 } ] }
//! ```
//!
//! Parsing has no nesting limit and conversion into a [`PhyloTree`] is
//! iterative, so arbitrarily deep trees load.

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TreeResult;
use crate::geometry::Vec2;
use crate::tree::{BoundedDisplay, NodeId, PhyloTree};

/// One node of a tree document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub label: String,
    pub distance: f32,
    pub bounded: bool,
    pub collapsed: bool,
    /// Label width and height; omitted labels take no room.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_size: Option<[f32; 2]>,
    /// Optional initial position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 2]>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn leaf(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_children(label: impl Into<String>, children: Vec<NodeSpec>) -> Self {
        Self {
            label: label.into(),
            children,
            ..Self::default()
        }
    }
}

/// Parses a document from a JSON string.
pub fn from_json_str(json: &str) -> TreeResult<PhyloTree> {
    parse(serde_json::Deserializer::from_str(json))
}

/// Parses a document from a reader.
pub fn from_reader<R: Read>(reader: R) -> TreeResult<PhyloTree> {
    parse(serde_json::Deserializer::from_reader(reader))
}

/// Each tree level is two JSON nesting levels, so the parser's recursion
/// limit is lifted and the stack grows on demand instead.
fn parse<'de, R: serde_json::de::Read<'de>>(
    mut de: serde_json::Deserializer<R>,
) -> TreeResult<PhyloTree> {
    de.disable_recursion_limit();
    let spec = NodeSpec::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    build_tree(spec)
}

/// Builds an arena tree from a document, depth-first.
///
/// The document is taken apart node by node, so dropping it never recurses.
/// Siblings keep their document order.
pub fn build_tree(mut spec: NodeSpec) -> TreeResult<PhyloTree> {
    let mut tree = PhyloTree::new();
    let root = tree.add_root(std::mem::take(&mut spec.label))?;
    apply_spec(&mut tree, root, &mut spec);

    let mut pending: Vec<(NodeId, NodeSpec)> = vec![(root, spec)];
    while let Some((parent, mut parent_spec)) = pending.pop() {
        for mut child_spec in std::mem::take(&mut parent_spec.children) {
            let child = tree.add_child(parent, std::mem::take(&mut child_spec.label))?;
            apply_spec(&mut tree, child, &mut child_spec);
            pending.push((child, child_spec));
        }
    }

    debug!(nodes = tree.len(), "tree document loaded");
    Ok(tree)
}

fn apply_spec(tree: &mut PhyloTree, id: NodeId, spec: &mut NodeSpec) {
    let node = &mut tree[id];
    node.distance = spec.distance;
    node.collapsed = spec.collapsed;
    node.bounded_display = if spec.bounded {
        BoundedDisplay::Bounded
    } else {
        BoundedDisplay::Unbounded
    };
    if let Some([w, h]) = spec.label_size {
        node.label_size = Vec2::new(w, h);
    }
    if let Some([x, y]) = spec.position {
        node.position = Vec2::new(x, y);
    }
    node.features = std::mem::take(&mut spec.features);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;

    #[test]
    fn test_parse_nested_document() {
        let json = r#"{
            "label": "root",
            "bounded": true,
            "children": [
                { "label": "a", "distance": 0.5, "label_size": [10, 3] },
                { "label": "b", "collapsed": true, "children": [ { "label": "b1" } ] }
            ]
        }"#;
        let tree = from_json_str(json).unwrap();
        assert_eq!(tree.len(), 4);
        let root = tree.root().unwrap();
        assert!(tree[root].is_bounded());
        let a = tree[root].children()[0];
        assert_eq!(tree[a].label, "a");
        assert_eq!(tree[a].distance, 0.5);
        assert_eq!(tree[a].label_size, Vec2::new(10.0, 3.0));
        let b = tree[root].children()[1];
        assert!(tree[b].is_visible_leaf());
        assert_eq!(tree.visible_node_count(), 3);
    }

    #[test]
    fn test_children_keep_document_order() {
        let spec = NodeSpec::with_children(
            "r",
            vec![NodeSpec::leaf("x"), NodeSpec::leaf("y"), NodeSpec::leaf("z")],
        );
        let tree = build_tree(spec).unwrap();
        let root = tree.root().unwrap();
        let labels: Vec<&str> = tree[root]
            .children()
            .iter()
            .map(|&c| tree[c].label.as_str())
            .collect();
        assert_eq!(labels, ["x", "y", "z"]);
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let err = from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, TreeError::InvalidDocument(_)));
    }

    #[test]
    fn test_deep_document_loads() {
        const DEPTH: usize = 10_000;
        let mut json = String::new();
        for i in 0..DEPTH {
            json.push_str(&format!(r#"{{"label":"n{i}","children":["#));
        }
        json.push_str(r#"{"label":"tip"}"#);
        for _ in 0..DEPTH {
            json.push_str("]}");
        }

        let tree = from_json_str(&json).unwrap();
        assert_eq!(tree.len(), DEPTH + 1);
        let deepest = tree.depths().into_iter().flatten().max();
        assert_eq!(deepest, Some(DEPTH));

        let tree = from_reader(json.as_bytes()).unwrap();
        assert_eq!(tree.len(), DEPTH + 1);
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let err = from_json_str(r#"{ "label": "r" } extra"#).unwrap_err();
        assert!(matches!(err, TreeError::InvalidDocument(_)));
    }
}

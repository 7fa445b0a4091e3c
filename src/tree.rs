//! Persisted tree model: a [`Tree`] owns an arena of [`Node`]s.
//!
//! Parent and child links are arena indices. A node's public identity is a [`NodeId`], the
//! owning tree's id plus the node's canonical pre-order index, rendered as `<tree>:<index>`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::canonical::CanonicalTree;
use crate::error::{Error, Result};
use crate::stats::TreeStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TreeId(Uuid);

impl TreeId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        TreeId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TreeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(TreeId)
            .map_err(|e| Error::InvalidArgument(format!("bad tree id {s:?}: {e}")))
    }
}

/// Opaque node identifier scoped to its owning tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub tree: TreeId,
    pub index: usize,
}

impl NodeId {
    pub fn new(tree: TreeId, index: usize) -> Self {
        NodeId { tree, index }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tree, self.index)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (tree, index) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("bad node id {s:?}")))?;
        let index = index
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("bad node index in {s:?}")))?;
        Ok(NodeId { tree: tree.parse()?, index })
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Source of fresh tree identities.
pub trait IdGenerator: Send + Sync {
    fn next_tree_id(&self) -> TreeId;
}

/// Random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_tree_id(&self) -> TreeId {
        TreeId(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub label: String,
    pub is_leaf: bool,
    pub depth: usize,
    pub branch_length: f64,
    pub leaf_count: usize,
    pub position: Vec<f64>,
    /// External sequence record linked to this leaf, if any.
    pub sequence_ref: Option<String>,
}

impl Node {
    pub fn tree_id(&self) -> TreeId {
        self.id.tree
    }

    pub fn index(&self) -> usize {
        self.id.index
    }
}

/// Everything needed to assemble a [`Tree`]; produced by the ingestion pipeline.
pub(crate) struct TreeParts {
    pub id: TreeId,
    pub name: String,
    pub shape: CanonicalTree,
    pub stats: TreeStats,
    pub embedding: Vec<f64>,
    pub positions: Vec<Vec<f64>>,
    pub sequence_refs: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// An ingested tree. Immutable; shared as `Arc<Tree>`.
#[derive(Debug, Clone, Serialize)]
pub struct Tree {
    id: TreeId,
    name: String,
    root: usize,
    leaf_count: usize,
    node_count: usize,
    embedding: Vec<f64>,
    created_at: DateTime<Utc>,
    stats: TreeStats,
    nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn assemble(parts: TreeParts) -> Tree {
        let TreeParts { id, name, shape, stats, embedding, positions, sequence_refs, created_at } = parts;

        let leaf_count = shape.leaf_count();
        let nodes: Vec<Node> = shape
            .into_nodes()
            .into_iter()
            .zip(positions)
            .enumerate()
            .map(|(index, (n, position))| {
                let is_leaf = n.is_leaf();
                let sequence_ref = if is_leaf { sequence_refs.get(&n.label).cloned() } else { None };
                Node {
                    id: NodeId::new(id, index),
                    parent: n.parent,
                    children: n.children,
                    label: n.label,
                    is_leaf,
                    depth: n.depth,
                    branch_length: n.branch_length,
                    leaf_count: n.leaf_count,
                    position,
                    sequence_ref,
                }
            })
            .collect();

        Tree {
            id,
            name,
            root: CanonicalTree::ROOT,
            leaf_count,
            node_count: nodes.len(),
            embedding,
            created_at,
            stats,
            nodes,
        }
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Node {
        &self.nodes[self.root]
    }

    pub fn root_id(&self) -> NodeId {
        NodeId::new(self.id, self.root)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn embedding(&self) -> &[f64] {
        &self.embedding
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn stats(&self) -> &TreeStats {
        &self.stats
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Fewer than two leaves: the embedding is all zeros.
    pub fn is_degenerate(&self) -> bool {
        self.leaf_count < 2
    }

    /// Resolve a node id against this tree.
    ///
    /// # Errors
    /// `InvalidArgument` if the id belongs to another tree, `NodeNotFound` if the index is
    /// outside the arena.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        if id.tree != self.id {
            return Err(Error::InvalidArgument(format!(
                "node {id} does not belong to tree {}",
                self.id
            )));
        }
        self.nodes.get(id.index).ok_or(Error::NodeNotFound(id))
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter(|n| n.is_leaf)
    }

    /// First node carrying `label`, in canonical order.
    pub fn find_label(&self, label: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.label == label)
    }

    pub fn summary(&self) -> TreeSummary {
        TreeSummary {
            id: self.id,
            name: self.name.clone(),
            leaf_count: self.leaf_count,
            node_count: self.node_count,
            created_at: self.created_at,
        }
    }
}

/// Tree metadata without nodes or vectors, for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeSummary {
    pub id: TreeId,
    pub name: String,
    pub leaf_count: usize,
    pub node_count: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_round_trips_through_text() {
        let tree = UuidGenerator.next_tree_id();
        let id = NodeId::new(tree, 17);
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_ids_are_invalid_arguments() {
        assert!(matches!("nope".parse::<TreeId>(), Err(Error::InvalidArgument(_))));
        assert!(matches!("no-colon".parse::<NodeId>(), Err(Error::InvalidArgument(_))));
        let tree = UuidGenerator.next_tree_id();
        assert!(matches!(format!("{tree}:x").parse::<NodeId>(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn node_id_serializes_as_string() {
        let tree = UuidGenerator.next_tree_id();
        let json = serde_json::to_string(&NodeId::new(tree, 3)).unwrap();
        assert_eq!(json, format!("\"{tree}:3\""));
    }
}

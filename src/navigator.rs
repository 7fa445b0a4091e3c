//! Structural queries over one tree's node arena.
//!
//! All queries walk parent/child indices of an immutable [`Tree`]; nothing is re-sorted, so
//! results come back in canonical order.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::error::Result;
use crate::newick::write_subtree;
use crate::tree::{Node, NodeId, Tree};

/// Newick text of a subtree together with the ids of every node it contains.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subtree {
    pub root: NodeId,
    pub newick: String,
    /// Pre-order, starting with `root`.
    pub node_ids: Vec<NodeId>,
}

/// A leaf near some node, with its distance from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedLeaf {
    pub node: NodeId,
    pub label: String,
    pub edges: usize,
    pub patristic_distance: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Navigator<'t> {
    tree: &'t Tree,
}

impl<'t> Navigator<'t> {
    pub fn new(tree: &'t Tree) -> Self {
        Navigator { tree }
    }

    fn node(&self, id: NodeId) -> Result<&'t Node> {
        self.tree.node(id)
    }

    fn parent(&self, node: &Node) -> Option<&'t Node> {
        node.parent.map(|p| &self.tree.nodes()[p])
    }

    /// Indices from `index` up to the root, `index` included.
    fn chain(&self, index: usize) -> Vec<usize> {
        let nodes = self.tree.nodes();
        let mut chain = vec![index];
        let mut cur = index;
        while let Some(p) = nodes[cur].parent {
            chain.push(p);
            cur = p;
        }
        chain
    }

    /// Parent chain to the root, nearest first.
    pub fn ancestors(&self, id: NodeId, max_depth: Option<usize>) -> Result<Vec<&'t Node>> {
        let node = self.node(id)?;
        let limit = max_depth.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        let mut cur = node;
        while out.len() < limit {
            let Some(parent) = self.parent(cur) else { break };
            out.push(parent);
            cur = parent;
        }
        Ok(out)
    }

    /// Breadth-first walk below `id` (excluded), bounded by relative depth.
    pub fn descendants(
        &self,
        id: NodeId,
        leaves_only: bool,
        max_depth: Option<usize>,
    ) -> Result<Vec<&'t Node>> {
        let start = self.node(id)?;
        let limit = max_depth.unwrap_or(usize::MAX);
        let nodes = self.tree.nodes();

        let mut out = Vec::new();
        let mut queue: VecDeque<(usize, usize)> =
            start.children.iter().map(|&c| (c, 1)).collect();
        while let Some((idx, rel_depth)) = queue.pop_front() {
            if rel_depth > limit {
                continue;
            }
            let node = &nodes[idx];
            if !leaves_only || node.is_leaf {
                out.push(node);
            }
            queue.extend(node.children.iter().map(|&c| (c, rel_depth + 1)));
        }
        Ok(out)
    }

    /// Lowest common ancestor. A node is its own ancestor here, so `lca(a, a) == a`.
    pub fn lca(&self, a: NodeId, b: NodeId) -> Result<&'t Node> {
        let a = self.node(a)?;
        let b = self.node(b)?;
        Ok(&self.tree.nodes()[self.lca_index(a.index(), b.index())])
    }

    fn lca_index(&self, a: usize, b: usize) -> usize {
        let seen: HashSet<usize> = self.chain(a).into_iter().collect();
        // Every chain ends at the root, so the search cannot miss.
        self.chain(b)
            .into_iter()
            .find(|i| seen.contains(i))
            .unwrap_or(self.tree.root().index())
    }

    /// Sum of branch lengths from `from` up to its ancestor `to`.
    fn length_up(&self, from: usize, to: usize) -> f64 {
        let nodes = self.tree.nodes();
        let mut total = 0.0;
        let mut cur = from;
        while cur != to {
            total += nodes[cur].branch_length;
            match nodes[cur].parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        total
    }

    /// Patristic distance: total branch length on the path between `a` and `b`.
    pub fn path_length(&self, a: NodeId, b: NodeId) -> Result<f64> {
        let a = self.node(a)?.index();
        let b = self.node(b)?.index();
        let lca = self.lca_index(a, b);
        Ok(self.length_up(a, lca) + self.length_up(b, lca))
    }

    pub fn subtree_extract(&self, id: NodeId, precision: usize) -> Result<Subtree> {
        let root = self.node(id)?;
        let nodes = self.tree.nodes();

        let mut node_ids = Vec::with_capacity(root.leaf_count * 2);
        let mut stack = vec![root.index()];
        while let Some(idx) = stack.pop() {
            node_ids.push(nodes[idx].id);
            stack.extend(nodes[idx].children.iter().rev());
        }

        Ok(Subtree {
            root: root.id,
            newick: write_subtree(self.tree, root.index(), precision),
            node_ids,
        })
    }

    /// Leaves within `max_edges` edges of `id`, closest first.
    pub fn related_leaves(&self, id: NodeId, max_edges: usize) -> Result<Vec<RelatedLeaf>> {
        let origin = self.node(id)?;
        let nodes = self.tree.nodes();

        let mut related: Vec<RelatedLeaf> = self
            .tree
            .leaves()
            .filter(|leaf| leaf.index() != origin.index())
            .filter_map(|leaf| {
                let lca = self.lca_index(origin.index(), leaf.index());
                let edges = origin.depth + leaf.depth - 2 * nodes[lca].depth;
                (edges <= max_edges).then(|| RelatedLeaf {
                    node: leaf.id,
                    label: leaf.label.clone(),
                    edges,
                    patristic_distance: self.length_up(origin.index(), lca)
                        + self.length_up(leaf.index(), lca),
                })
            })
            .collect();

        related.sort_by(|a, b| {
            a.edges
                .cmp(&b.edges)
                .then(a.patristic_distance.total_cmp(&b.patristic_distance))
                .then(a.node.index.cmp(&b.node.index))
        });
        Ok(related)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::build_tree;
    use crate::error::Error;
    use crate::newick::{DEFAULT_PRECISION, parse};
    use crate::topology::embed;

    fn labels(nodes: &[&Node]) -> Vec<String> {
        nodes.iter().map(|n| n.label.clone()).collect()
    }

    fn id_of(tree: &Tree, label: &str) -> NodeId {
        tree.find_label(label).unwrap().id
    }

    #[test]
    fn quartet_navigation() {
        let tree = build_tree("((A,B),(C,D));");
        let nav = Navigator::new(&tree);
        let (a, b, c) = (id_of(&tree, "A"), id_of(&tree, "B"), id_of(&tree, "C"));

        let ab = nav.lca(a, b).unwrap();
        assert_eq!(ab.children.len(), 2);
        assert_eq!(Some(ab.index()), tree.node(a).unwrap().parent);

        assert_eq!(nav.lca(a, c).unwrap().id, tree.root_id());

        let ancestors = nav.ancestors(a, None).unwrap();
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].id, ab.id);
        assert_eq!(ancestors[1].id, tree.root_id());

        let leaves = nav.descendants(tree.root_id(), true, None).unwrap();
        assert_eq!(labels(&leaves), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn ancestors_truncate_and_root_has_none() {
        let tree = build_tree("(((A,B),C),D);");
        let nav = Navigator::new(&tree);
        let a = id_of(&tree, "A");
        assert_eq!(nav.ancestors(a, Some(1)).unwrap().len(), 1);
        assert_eq!(nav.ancestors(a, None).unwrap().len(), 3);
        assert!(nav.ancestors(tree.root_id(), None).unwrap().is_empty());
    }

    #[test]
    fn descendants_are_breadth_first_and_bounded() {
        let tree = build_tree("(((A,B),C),D);");
        let nav = Navigator::new(&tree);
        let all = nav.descendants(tree.root_id(), false, None).unwrap();
        assert_eq!(all.len(), tree.node_count() - 1);
        let depths: Vec<usize> = all.iter().map(|n| n.depth).collect();
        assert!(depths.windows(2).all(|w| w[0] <= w[1]));

        let shallow = nav.descendants(tree.root_id(), false, Some(1)).unwrap();
        assert_eq!(shallow.len(), 2);
        assert!(nav.descendants(id_of(&tree, "A"), false, None).unwrap().is_empty());
    }

    #[test]
    fn lca_of_node_with_itself_and_ancestor() {
        let tree = build_tree("((A,B),(C,D));");
        let nav = Navigator::new(&tree);
        let a = id_of(&tree, "A");
        assert_eq!(nav.lca(a, a).unwrap().id, a);
        assert_eq!(nav.lca(a, tree.root_id()).unwrap().id, tree.root_id());
    }

    #[test]
    fn unknown_and_foreign_nodes() {
        let tree = build_tree("((A,B),(C,D));");
        let other = build_tree("(X,Y);");
        let nav = Navigator::new(&tree);

        let missing = NodeId::new(tree.id(), 99);
        assert!(matches!(nav.ancestors(missing, None), Err(Error::NodeNotFound(_))));

        let foreign = id_of(&other, "X");
        let err = nav.lca(id_of(&tree, "A"), foreign).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn extracted_root_reparses_to_same_embedding() {
        let text = "((B:0.25,A:0.5)x:1.5,('C d':0.125,(D:2,E:3):0.75):0.5);";
        let tree = build_tree(text);
        let nav = Navigator::new(&tree);
        let sub = nav.subtree_extract(tree.root_id(), DEFAULT_PRECISION).unwrap();
        assert_eq!(sub.node_ids.len(), tree.node_count());
        assert_eq!(sub.node_ids[0], tree.root_id());

        let reparsed = embed(&parse(&sub.newick).unwrap());
        assert_eq!(reparsed, tree.embedding());
    }

    #[test]
    fn extraction_keeps_lengths_finer_than_the_precision() {
        let tree = build_tree("((A:0.1234567,B:0.2):0.3,(C:0.4,D:1e-8):0.6);");
        let sub = Navigator::new(&tree).subtree_extract(tree.root_id(), DEFAULT_PRECISION).unwrap();
        assert_eq!(embed(&parse(&sub.newick).unwrap()), tree.embedding());
    }

    #[test]
    fn unlabeled_zero_length_root_extracts_to_parseable_text() {
        let tree = build_tree(":0;");
        let sub = Navigator::new(&tree).subtree_extract(tree.root_id(), DEFAULT_PRECISION).unwrap();
        assert_eq!(sub.newick, ":0;");
        assert_eq!(embed(&parse(&sub.newick).unwrap()), tree.embedding());
    }

    #[test]
    fn extract_inner_subtree() {
        let tree = build_tree("((A:1,B:2):3,C:4);");
        let nav = Navigator::new(&tree);
        let ab = nav.lca(id_of(&tree, "A"), id_of(&tree, "B")).unwrap();
        let sub = nav.subtree_extract(ab.id, 2).unwrap();
        assert_eq!(sub.newick, "(A:1.00,B:2.00):3.00;");
        assert_eq!(sub.node_ids.len(), 3);
    }

    #[test]
    fn related_leaves_sorted_by_edges_then_distance() {
        let tree = build_tree("((A:1,B:2):1,(C:1,D:5):1);");
        let nav = Navigator::new(&tree);
        let a = id_of(&tree, "A");

        let near = nav.related_leaves(a, 2).unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].label, "B");
        assert_eq!(near[0].patristic_distance, 3.0);

        let all = nav.related_leaves(a, 10).unwrap();
        let order: Vec<&str> = all.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "D"]);
        assert_eq!(all[1].edges, 4);
        assert_eq!(all[1].patristic_distance, 4.0);
        assert_eq!(nav.path_length(a, id_of(&tree, "D")).unwrap(), 8.0);
    }
}

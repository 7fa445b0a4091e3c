//! Canonical child ordering for parsed trees.
//!
//! # Overview
//! Newick text fixes an arbitrary sibling order: `((A,B),C);` and `(C,(B,A));` describe the
//! same tree. Every downstream computation (embeddings, node ids, split patterns) walks
//! children in stored order, so the parser reorders siblings exactly once, here, before any id
//! is assigned.
//!
//! # Ordering key
//! Siblings are sorted ascending by:
//! 1. the minimum leaf index reachable in the child's subtree, where a leaf's index is the rank
//!    of its label among the tree's distinct leaf labels sorted lexicographically;
//! 2. the child's subtree leaf count;
//! 3. the sorted leaf labels of the child's subtree, compared lexicographically;
//! 4. the child's isomorphism class id: subtrees of lower height come first, and among equal
//!    heights the order of `(label, branch-length bits, child classes)`.
//!
//! Using label ranks rather than input positions is what makes the index independent of
//! the input text. Key 3 is only built for siblings that tie on keys 1 and 2, which needs a
//! label shared by both. Key 4 only ties for identical subtrees, whose order cannot be
//! observed.
//!
//! Every pass here is a loop over the flat [`RawTree`], so nesting depth is bounded only by
//! memory.
//!
//! ```text
//! input:   (C,(B,A));        ranks: A=0, B=1, C=2
//!
//!   root                       root
//!   /  \      canonical       /    \
//!  C   (B,A)  ───────────▶  (A,B)   C
//!
//! min ranks: C=2, (B,A)=0  → (A,B) first; inside, A=0 before B=1
//! ```

use std::cmp::Ordering;

use serde::Serialize;

/// A node as produced by the parser, children still in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RawNode {
    pub label: String,
    pub branch_length: f64,
    pub children: Vec<usize>,
}

/// Flat parse result. Every node is pushed after its parent, so index 0 is the root and
/// walking the indices backwards visits children before parents.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RawTree {
    nodes: Vec<RawNode>,
}

impl RawTree {
    pub(crate) const ROOT: usize = 0;

    /// Append an empty node under `parent` and return its index.
    pub(crate) fn push(&mut self, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(RawNode::default());
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        index
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> &mut RawNode {
        &mut self.nodes[index]
    }

    pub(crate) fn map_leaf_labels(&mut self, f: &dyn Fn(&str) -> Option<String>) {
        for node in self.nodes.iter_mut().filter(|n| n.children.is_empty()) {
            if let Some(mapped) = f(&node.label) {
                node.label = mapped;
            }
        }
    }
}

/// One node of a canonically ordered tree. Index 0 is the root; indices follow pre-order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalNode {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub label: String,
    pub branch_length: f64,
    pub depth: usize,
    /// Number of leaves in the subtree rooted here (1 for a leaf).
    pub leaf_count: usize,
}

impl CanonicalNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena of canonically ordered nodes. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTree {
    nodes: Vec<CanonicalNode>,
}

impl CanonicalTree {
    pub const ROOT: usize = 0;

    pub fn nodes(&self) -> &[CanonicalNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&CanonicalNode> {
        self.nodes.get(index)
    }

    pub fn root(&self) -> &CanonicalNode {
        &self.nodes[Self::ROOT]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.root().leaf_count
    }

    /// Leaf indices in canonical (pre-order) order.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| i)
    }

    /// Node indices in canonical post-order (children left to right, then the parent).
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(Self::ROOT, 0usize)];
        while let Some((idx, next_child)) = stack.pop() {
            let node = &self.nodes[idx];
            if next_child < node.children.len() {
                stack.push((idx, next_child + 1));
                stack.push((node.children[next_child], 0));
            } else {
                order.push(idx);
            }
        }
        order
    }

    pub(crate) fn into_nodes(self) -> Vec<CanonicalNode> {
        self.nodes
    }
}

/// Per-node sort keys, computed children first.
struct Keys {
    min_rank: Vec<usize>,
    leaf_count: Vec<usize>,
    /// Isomorphism class: equal ids mean identical subtrees, labels and length bits included.
    class: Vec<u32>,
}

impl Keys {
    fn primary(&self, a: usize, b: usize) -> Ordering {
        self.min_rank[a]
            .cmp(&self.min_rank[b])
            .then(self.leaf_count[a].cmp(&self.leaf_count[b]))
    }
}

/// Leaf ranks under `root`, ascending. For a leaf, `min_rank` is its own rank.
fn sorted_leaf_ranks(nodes: &[RawNode], min_rank: &[usize], root: usize) -> Vec<usize> {
    let mut ranks = Vec::new();
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
        if nodes[idx].children.is_empty() {
            ranks.push(min_rank[idx]);
        }
        stack.extend(&nodes[idx].children);
    }
    ranks.sort_unstable();
    ranks
}

/// Sort every child list in place and return the keys used.
///
/// Class ids are handed out height by height. Within one height, nodes are grouped by
/// `(label, length bits, child classes in sorted order)` and ids follow the sorted order of
/// those signatures, so they never depend on input order.
fn sort_children(nodes: &mut [RawNode], ranks: &[&str]) -> Keys {
    let n = nodes.len();
    let mut keys = Keys { min_rank: vec![usize::MAX; n], leaf_count: vec![1; n], class: vec![0; n] };
    let mut height = vec![0usize; n];

    for idx in (0..n).rev() {
        let node = &nodes[idx];
        if node.children.is_empty() {
            keys.min_rank[idx] = ranks
                .binary_search(&node.label.as_str())
                .unwrap_or_else(|insert_at| insert_at);
            continue;
        }
        keys.min_rank[idx] = node.children.iter().map(|&c| keys.min_rank[c]).min().unwrap_or(usize::MAX);
        keys.leaf_count[idx] = node.children.iter().map(|&c| keys.leaf_count[c]).sum();
        height[idx] = node.children.iter().map(|&c| height[c] + 1).max().unwrap_or(0);
    }

    let mut by_height: Vec<Vec<usize>> = vec![Vec::new(); height.iter().max().map_or(0, |h| h + 1)];
    for (idx, &h) in height.iter().enumerate() {
        by_height[h].push(idx);
    }

    let mut signatures: Vec<Vec<u32>> = vec![Vec::new(); n];
    let mut next_class = 0u32;
    for level in &mut by_height {
        for &idx in level.iter() {
            let mut children = std::mem::take(&mut nodes[idx].children);
            children.sort_by(|&a, &b| keys.primary(a, b));
            for run in children.chunk_by_mut(|&a, &b| keys.primary(a, b) == Ordering::Equal) {
                if run.len() > 1 {
                    run.sort_by_cached_key(|&c| (sorted_leaf_ranks(nodes, &keys.min_rank, c), keys.class[c]));
                }
            }
            signatures[idx] = children.iter().map(|&c| keys.class[c]).collect();
            nodes[idx].children = children;
        }

        let signature = |idx: usize| (nodes[idx].label.as_str(), nodes[idx].branch_length.to_bits(), &signatures[idx]);
        level.sort_by(|&a, &b| signature(a).cmp(&signature(b)));
        for (pos, &idx) in level.iter().enumerate() {
            if pos > 0 && signature(level[pos - 1]) != signature(idx) {
                next_class += 1;
            }
            keys.class[idx] = next_class;
        }
        next_class += 1;
    }
    keys
}

/// Lay out the sorted raw tree as a pre-order arena.
fn flatten(mut nodes: Vec<RawNode>, leaf_count: &[usize]) -> Vec<CanonicalNode> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut stack = vec![(RawTree::ROOT, None, 0usize)];

    while let Some((raw, parent, depth)) = stack.pop() {
        let index = out.len();
        let children = std::mem::take(&mut nodes[raw].children);
        out.push(CanonicalNode {
            parent,
            children: Vec::with_capacity(children.len()),
            label: std::mem::take(&mut nodes[raw].label),
            branch_length: nodes[raw].branch_length,
            depth,
            leaf_count: leaf_count[raw],
        });
        if let Some(parent) = parent {
            out[parent].children.push(index);
        }
        // Reversed so the first child is popped, and therefore numbered, first.
        stack.extend(children.into_iter().rev().map(|child| (child, Some(index), depth + 1)));
    }
    out
}

/// Reorder every sibling list canonically and lay the tree out as a pre-order arena.
pub(crate) fn canonicalize(raw: RawTree) -> CanonicalTree {
    let RawTree { mut nodes } = raw;
    if nodes.is_empty() {
        return CanonicalTree { nodes: Vec::new() };
    }

    let mut leaf_labels: Vec<String> =
        nodes.iter().filter(|n| n.children.is_empty()).map(|n| n.label.clone()).collect();
    leaf_labels.sort_unstable();
    leaf_labels.dedup();
    let ranks: Vec<&str> = leaf_labels.iter().map(String::as_str).collect();

    let keys = sort_children(&mut nodes, &ranks);
    CanonicalTree { nodes: flatten(nodes, &keys.leaf_count) }
}

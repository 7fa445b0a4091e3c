//! Clade snapshots of ingested trees.
//!
//! # Overview
//! A [`TreeSnapshot`] captures every non-trivial bipartition (split) of a tree with the
//! length of the edge that creates it. Two snapshots over the same taxa can then be compared
//! with set operations, see [`crate::distances`].
//!
//! ```text
//!      root
//!     /    \
//!   {A,B}  {C,D}  ← this edge splits {A,B} | {C,D}
//! ```
//!
//! # Taxon indices
//! Bits are assigned by taxon *name*, sorted alphabetically, so the same clade gets the same
//! bitset in every tree regardless of node indices. A split is stored as the side that does
//! not contain taxon 0, so `{A,B}|{C,D}` is always `{C,D}`.

use std::collections::{HashMap, HashSet};

use crate::bitset::Bitset;
use crate::error::{Error, Result};
use crate::tree::Tree;

#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// Canonical splits, excluding the root and single-taxon splits.
    pub parts: HashSet<Bitset>,

    /// Length of the edge above each split; missing lengths are `0.0`.
    pub lengths: HashMap<Bitset, f64>,

    /// Raw (non-canonical) clades of the root's children, sorted.
    pub root_children: Vec<Bitset>,

    /// Taxon names in bit order.
    pub taxa: Vec<String>,

    pub words: usize,

    /// A bifurcating root marks the tree as rooted.
    pub rooted: bool,
}

impl TreeSnapshot {
    /// Extract all splits of `tree`.
    ///
    /// # Errors
    /// `InvalidArgument` when two leaves share a label, since taxa must map to unique bits.
    pub fn from_tree(tree: &Tree) -> Result<Self> {
        let mut taxa: Vec<String> = tree.leaves().map(|n| n.label.clone()).collect();
        taxa.sort_unstable();
        if let Some(pair) = taxa.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::InvalidArgument(format!(
                "duplicate taxon {:?} in tree {}",
                pair[0],
                tree.id()
            )));
        }

        let words = Bitset::words_for(taxa.len());
        let bit_of: HashMap<&str, usize> =
            taxa.iter().enumerate().map(|(i, name)| (name.as_str(), i)).collect();

        // Children always follow their parent in the arena, so a reverse sweep sees every
        // child's clade before the parent's.
        let nodes = tree.nodes();
        let mut clades = vec![Bitset::zeros(words); nodes.len()];
        for (idx, node) in nodes.iter().enumerate().rev() {
            if node.is_leaf {
                if let Some(&bit) = bit_of.get(node.label.as_str()) {
                    clades[idx].set(bit);
                }
            } else {
                let mut clade = Bitset::zeros(words);
                for &child in &node.children {
                    clade.or_assign(&clades[child]);
                }
                clades[idx] = clade;
            }
        }

        let mut parts = HashSet::new();
        let mut lengths = HashMap::new();
        for (node, clade) in nodes.iter().zip(&clades).skip(1) {
            if clade.count_ones() <= 1 {
                continue;
            }
            let canonical = if clade.contains(0) {
                clade.complement(taxa.len())
            } else {
                clade.clone()
            };
            lengths.insert(canonical.clone(), node.branch_length);
            parts.insert(canonical);
        }

        let root = tree.root();
        let mut root_children: Vec<Bitset> =
            root.children.iter().map(|&c| clades[c].clone()).collect();
        root_children.sort_unstable();

        Ok(TreeSnapshot {
            parts,
            lengths,
            rooted: root.children.len() == 2,
            root_children,
            taxa,
            words,
        })
    }

    pub fn num_taxa(&self) -> usize {
        self.taxa.len()
    }

    /// Both snapshots describe the same taxa, so their bitsets are comparable.
    pub fn same_taxa(&self, other: &TreeSnapshot) -> bool {
        self.taxa == other.taxa
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::build_tree;

    fn bits(indices: &[usize], words: usize) -> Bitset {
        let mut bs = Bitset::zeros(words);
        for &i in indices {
            bs.set(i);
        }
        bs
    }

    /// ```text
    ///              root
    ///             /    \
    ///         node1     E
    ///         /   \
    ///     node2    D
    ///     /   \
    ///    A    node3
    ///         /   \
    ///        B     C
    /// ```
    ///
    /// | Node  | Clade     | Has A? | Stored |
    /// |-------|-----------|--------|--------|
    /// | node3 | {B,C}     | no     | {B,C}  |
    /// | node2 | {A,B,C}   | yes    | {D,E}  |
    /// | node1 | {A,B,C,D} | yes    | {E}    |
    #[test]
    fn asymmetric_tree_splits() {
        let tree = build_tree("(((A,(B,C):0.3):0.2,D):0.1,E);");
        let snap = TreeSnapshot::from_tree(&tree).unwrap();

        assert_eq!(snap.num_taxa(), 5);
        assert!(snap.rooted);
        let expected: HashSet<Bitset> =
            [bits(&[1, 2], 1), bits(&[3, 4], 1), bits(&[4], 1)].into_iter().collect();
        assert_eq!(snap.parts, expected);
        assert_eq!(snap.lengths[&bits(&[1, 2], 1)], 0.3);
        assert_eq!(snap.lengths[&bits(&[3, 4], 1)], 0.2);
    }

    #[test]
    fn mirrored_sides_collapse_to_one_split() {
        // Both root children describe {A,B}|{C,D}.
        let tree = build_tree("((A,B),(C,D));");
        let snap = TreeSnapshot::from_tree(&tree).unwrap();
        assert_eq!(snap.parts.len(), 1);
        assert!(snap.parts.contains(&bits(&[2, 3], 1)));
        assert_eq!(snap.root_children, vec![bits(&[0, 1], 1), bits(&[2, 3], 1)]);
    }

    #[test]
    fn bits_follow_names_not_input_order() {
        let a = TreeSnapshot::from_tree(&build_tree("((Human,Chimp),Gorilla);")).unwrap();
        let b = TreeSnapshot::from_tree(&build_tree("(Gorilla,(Chimp,Human));")).unwrap();
        assert_eq!(a.taxa, vec!["Chimp", "Gorilla", "Human"]);
        assert!(a.same_taxa(&b));
        assert_eq!(a.root_children, b.root_children);
    }

    #[test]
    fn unrooted_multifurcation() {
        let snap = TreeSnapshot::from_tree(&build_tree("(A,B,(C,D));")).unwrap();
        assert!(!snap.rooted);
        assert_eq!(snap.parts.len(), 1);
    }

    #[test]
    fn duplicate_taxa_are_rejected() {
        let err = TreeSnapshot::from_tree(&build_tree("((A,A),B);")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}

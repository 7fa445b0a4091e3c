//! Clade-based distances between two trees over the same taxa.
//!
//! 1. **Robinson-Foulds (RF)**: number of splits found in only one of the trees.
//! 2. **Weighted Robinson-Foulds**: for shared splits `|length_a - length_b|`, for unique
//!    splits the full edge length.
//! 3. **Kuhner-Felsenstein (branch score)**: `sqrt(Σ (length_a - length_b)²)` over the same
//!    terms.
//!
//! These complement the embedding similarity: the embedding ignores labels, these compare
//! exactly which taxa are grouped together.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::snapshot::TreeSnapshot;
use crate::tree::Tree;
use crate::vector::symmetric_matrix;

/// All three distances for one pair of trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CladeDistances {
    pub robinson_foulds: usize,
    pub weighted_robinson_foulds: f64,
    pub kuhner_felsenstein: f64,
}

impl CladeDistances {
    pub fn from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> Self {
        CladeDistances {
            robinson_foulds: rf_from_snapshots(a, b),
            weighted_robinson_foulds: weighted_rf_from_snapshots(a, b),
            kuhner_felsenstein: kf_from_snapshots(a, b),
        }
    }

    /// `None` when the trees do not share exactly the same unique taxa.
    pub fn between(a: &Tree, b: &Tree) -> Option<Self> {
        let snap_a = TreeSnapshot::from_tree(a).ok()?;
        let snap_b = TreeSnapshot::from_tree(b).ok()?;
        snap_a
            .same_taxa(&snap_b)
            .then(|| Self::from_snapshots(&snap_a, &snap_b))
    }
}

fn comparable_snapshots(a: &Tree, b: &Tree) -> Result<(TreeSnapshot, TreeSnapshot)> {
    let snap_a = TreeSnapshot::from_tree(a)?;
    let snap_b = TreeSnapshot::from_tree(b)?;
    if !snap_a.same_taxa(&snap_b) {
        return Err(Error::InvalidArgument(format!(
            "trees {} and {} have different taxa",
            a.id(),
            b.id()
        )));
    }
    Ok((snap_a, snap_b))
}

/// Robinson-Foulds distance.
///
/// ```text
/// Tree 1:  ((A,B),(C,D))     splits: {A,B}|{C,D}
/// Tree 2:  ((A,C),(B,D))     splits: {A,C}|{B,D}
///
/// shared: 0  →  RF = 1 + 1 - 2*0 = 2, plus 2 because the roots differ
/// ```
///
/// # Errors
/// `InvalidArgument` if the taxa differ or a tree repeats a taxon.
pub fn robinson_foulds(a: &Tree, b: &Tree) -> Result<usize> {
    let (snap_a, snap_b) = comparable_snapshots(a, b)?;
    Ok(rf_from_snapshots(&snap_a, &snap_b))
}

/// `|A| + |B| - 2|A ∩ B|`; two rooted trees whose roots split the taxa differently get `+2`.
pub fn rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> usize {
    let inter = a.parts.intersection(&b.parts).count();
    let rf = a.parts.len() + b.parts.len() - 2 * inter;
    let same_root = a.root_children == b.root_children;
    if a.rooted && b.rooted && rf != 0 && !same_root { rf + 2 } else { rf }
}

pub fn weighted_robinson_foulds(a: &Tree, b: &Tree) -> Result<f64> {
    let (snap_a, snap_b) = comparable_snapshots(a, b)?;
    Ok(weighted_rf_from_snapshots(&snap_a, &snap_b))
}

/// Signed length difference per split; a split missing from one tree counts as length 0 there.
fn length_terms<'s>(a: &'s TreeSnapshot, b: &'s TreeSnapshot) -> impl Iterator<Item = f64> + 's {
    let from_a = a.parts.iter().map(move |part| {
        let length_a = a.lengths.get(part).copied().unwrap_or(0.0);
        match b.lengths.get(part) {
            Some(length_b) => length_a - length_b,
            None => length_a,
        }
    });
    let only_b = b
        .parts
        .iter()
        .filter(move |part| !a.parts.contains(*part))
        .map(move |part| b.lengths.get(part).copied().unwrap_or(0.0));
    from_a.chain(only_b)
}

pub fn weighted_rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    length_terms(a, b).map(f64::abs).sum()
}

pub fn kuhner_felsenstein(a: &Tree, b: &Tree) -> Result<f64> {
    let (snap_a, snap_b) = comparable_snapshots(a, b)?;
    Ok(kf_from_snapshots(&snap_a, &snap_b))
}

pub fn kf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    length_terms(a, b).map(|d| d * d).sum::<f64>().sqrt()
}

/// All-pairs matrix of one metric. Snapshots are expected to share their taxa.
pub fn pairwise<T, F>(snapshots: &[TreeSnapshot], metric: F) -> Vec<Vec<T>>
where
    T: Copy + Default + Send,
    F: Fn(&TreeSnapshot, &TreeSnapshot) -> T + Sync,
{
    symmetric_matrix(snapshots.len(), |_| T::default(), |i, j| {
        metric(&snapshots[i], &snapshots[j])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::build_tree;
    use itertools::Itertools;

    // Reference trees and RF values from
    // https://evolution.genetics.washington.edu/phylip/doc/treedist.html
    const TREEDIST: [&str; 12] = [
        "(A:0.1,(B:0.1,(H:0.1,(D:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,((J:0.1,H:0.1):0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
    ];

    const TREEDIST_RF: [[usize; 12]; 12] = [
        [0, 4, 2, 10, 10, 10, 10, 10, 10, 10, 2, 10],
        [4, 0, 2, 10, 8, 10, 8, 10, 8, 10, 2, 10],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [10, 8, 10, 2, 0, 4, 2, 4, 2, 2, 10, 4],
        [10, 10, 10, 2, 4, 0, 2, 2, 4, 2, 10, 2],
        [10, 8, 10, 4, 2, 2, 0, 4, 2, 4, 10, 4],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
        [10, 8, 10, 4, 2, 4, 2, 2, 0, 4, 10, 2],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
    ];

    fn treedist_trees() -> Vec<Tree> {
        TREEDIST.iter().map(|t| build_tree(t)).collect()
    }

    #[test]
    fn robinson_foulds_treedist() {
        let trees = treedist_trees();
        for (i, j) in (0..trees.len()).tuple_combinations() {
            assert_eq!(robinson_foulds(&trees[i], &trees[j]).unwrap(), TREEDIST_RF[i][j], "[{i}, {j}]");
        }
    }

    // Every edge is 0.1 long, so each unshared split contributes 0.1 (weighted) or 0.01
    // (squared) and shared splits contribute nothing.
    #[test]
    fn weighted_robinson_foulds_treedist() {
        let trees = treedist_trees();
        for (i, j) in (0..trees.len()).tuple_combinations() {
            let expected = 0.1 * TREEDIST_RF[i][j] as f64;
            let got = weighted_robinson_foulds(&trees[i], &trees[j]).unwrap();
            assert!((got - expected).abs() < 1e-9, "[{i}, {j}] {got} vs {expected}");
        }
    }

    #[test]
    fn kuhner_felsenstein_treedist() {
        let trees = treedist_trees();
        for (i, j) in (0..trees.len()).tuple_combinations() {
            let expected = (0.01 * TREEDIST_RF[i][j] as f64).sqrt();
            let got = kuhner_felsenstein(&trees[i], &trees[j]).unwrap();
            assert!((got - expected).abs() < 1e-9, "[{i}, {j}] {got} vs {expected}");
        }
    }

    #[test]
    fn shared_splits_compare_lengths() {
        let a = build_tree("(((A:1,B:1):2,C:1):1,D:1);");
        let b = build_tree("(((A:1,B:1):3,C:1):1,D:1);");
        let d = CladeDistances::between(&a, &b).unwrap();
        assert_eq!(d.robinson_foulds, 0);
        assert_eq!(d.weighted_robinson_foulds, 1.0);
        assert_eq!(d.kuhner_felsenstein, 1.0);
    }

    #[test]
    fn rooted_trees_with_different_roots_pay_extra() {
        let a = build_tree("((A,B),(C,D));");
        let b = build_tree("((A,C),(B,D));");
        assert_eq!(robinson_foulds(&a, &b).unwrap(), 4);
    }

    #[test]
    fn different_taxa_are_not_comparable() {
        let a = build_tree("((A,B),C);");
        let b = build_tree("((A,B),D);");
        assert!(CladeDistances::between(&a, &b).is_none());
        assert!(matches!(robinson_foulds(&a, &b), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn pairwise_matches_treedist_table() {
        let snapshots: Vec<TreeSnapshot> = treedist_trees()
            .iter()
            .map(|t| TreeSnapshot::from_tree(t).unwrap())
            .collect();
        let matrix = pairwise(&snapshots, rf_from_snapshots);
        for (row, expected) in matrix.iter().zip(TREEDIST_RF.iter()) {
            assert_eq!(row.as_slice(), expected.as_slice());
        }
    }
}

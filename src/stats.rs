//! Summary statistics of a canonical tree.
//!
//! Computed once at ingestion and stored on the [`Tree`](crate::tree::Tree); the topology
//! encoder and the similarity explainer both read them so the two never disagree.

use itertools::Itertools;
use serde::Serialize;

use crate::canonical::CanonicalTree;

/// Edge (non-root) branch-length statistics. All zero for a single-node tree.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BranchStats {
    pub edges: usize,
    pub mean: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeStats {
    pub leaf_count: usize,
    pub internal_count: usize,
    pub node_count: usize,
    pub min_depth: usize,
    pub max_depth: usize,
    pub mean_depth: f64,
    pub depth_variance: f64,
    /// Mean of the per-internal-node balance ratios; 1.0 when there are no internal nodes.
    pub balance: f64,
    /// Balance ratio of each internal node, in canonical post-order.
    pub balance_ratios: Vec<f64>,
    pub branch: BranchStats,
}

/// Population mean and variance. `(0, 0)` for an empty slice.
pub(crate) fn mean_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance)
}

/// `min / max` of the children's subtree leaf counts (1.0 for a single child).
pub(crate) fn balance_ratio(tree: &CanonicalTree, index: usize) -> f64 {
    let nodes = tree.nodes();
    match nodes[index].children.iter().map(|&c| nodes[c].leaf_count).minmax().into_option() {
        Some((min, max)) => min as f64 / max as f64,
        None => 1.0,
    }
}

impl TreeStats {
    pub fn compute(tree: &CanonicalTree) -> Self {
        let nodes = tree.nodes();

        let leaf_depths: Vec<f64> = tree.leaves().map(|i| nodes[i].depth as f64).collect();
        let (min_depth, max_depth) = tree
            .leaves()
            .map(|i| nodes[i].depth)
            .minmax()
            .into_option()
            .unwrap_or((0, 0));
        let (mean_depth, depth_variance) = mean_variance(&leaf_depths);

        let balance_ratios: Vec<f64> = tree
            .post_order()
            .into_iter()
            .filter(|&i| !nodes[i].is_leaf())
            .map(|i| balance_ratio(tree, i))
            .collect();
        let balance = if balance_ratios.is_empty() {
            1.0
        } else {
            mean_variance(&balance_ratios).0
        };

        let lengths: Vec<f64> = nodes.iter().skip(1).map(|n| n.branch_length).collect();
        let branch = if lengths.is_empty() {
            BranchStats::default()
        } else {
            let (mean, variance) = mean_variance(&lengths);
            BranchStats {
                edges: lengths.len(),
                mean,
                variance,
                min: lengths.iter().copied().fold(f64::INFINITY, f64::min),
                max: lengths.iter().copied().fold(0.0, f64::max),
                total: lengths.iter().sum(),
            }
        };

        TreeStats {
            leaf_count: leaf_depths.len(),
            internal_count: balance_ratios.len(),
            node_count: nodes.len(),
            min_depth,
            max_depth,
            mean_depth,
            depth_variance,
            balance,
            balance_ratios,
            branch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse;

    #[test]
    fn balanced_quartet() {
        let stats = TreeStats::compute(&parse("((A:1,B:1):2,(C:1,D:3):2);").unwrap());
        assert_eq!(stats.leaf_count, 4);
        assert_eq!(stats.internal_count, 3);
        assert_eq!(stats.node_count, 7);
        assert_eq!((stats.min_depth, stats.max_depth), (2, 2));
        assert_eq!(stats.mean_depth, 2.0);
        assert_eq!(stats.depth_variance, 0.0);
        assert_eq!(stats.balance, 1.0);
        assert_eq!(stats.branch.edges, 6);
        assert_eq!(stats.branch.total, 10.0);
        assert_eq!(stats.branch.min, 1.0);
        assert_eq!(stats.branch.max, 3.0);
    }

    #[test]
    fn caterpillar_is_unbalanced() {
        let stats = TreeStats::compute(&parse("(((A,B),C),D);").unwrap());
        assert_eq!((stats.min_depth, stats.max_depth), (1, 3));
        // post-order: (A,B)=1/1, ((A,B),C)=1/2, root=1/3
        assert_eq!(stats.balance_ratios, vec![1.0, 0.5, 1.0 / 3.0]);
        assert_eq!(stats.branch, BranchStats { edges: 6, ..BranchStats::default() });
    }

    #[test]
    fn single_node_tree() {
        let stats = TreeStats::compute(&parse("A;").unwrap());
        assert_eq!(stats.leaf_count, 1);
        assert_eq!(stats.internal_count, 0);
        assert_eq!(stats.balance, 1.0);
        assert_eq!(stats.branch, BranchStats::default());
    }

    #[test]
    fn mean_variance_is_population() {
        let (mean, var) = mean_variance(&[1.0, 3.0]);
        assert_eq!(mean, 2.0);
        assert_eq!(var, 1.0);
    }
}

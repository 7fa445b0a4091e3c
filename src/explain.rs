//! Decompose an embedding similarity into per-block scores and readable reasons.
//!
//! # Block scores
//! Both trees' embeddings are unit length, so the overall cosine splits exactly over the six
//! blocks:
//!
//! ```text
//! overall = Σ_b  q_b · c_b  =  Σ_b  |q_b| |c_b| · cos(q_b, c_b)  =  Σ_b  weight_b · raw_b
//! ```
//!
//! `raw` is the cosine of the two independently normalised slices and `weight` is the share of
//! the overall score that block can carry. [`Explanation::reconstruct`] re-adds the terms; it
//! agrees with `overall` to within [`BLOCK_CONSISTENCY_TOLERANCE`].
//!
//! # Reasons
//! One reason per compared statistic, then a summary. Matches and similarities come first,
//! strongest block first; differences follow, widest gap first.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::debug;

use crate::distances::CladeDistances;
use crate::topology::Block;
use crate::tree::{Tree, TreeId};
use crate::vector::{cosine, dot, l2_norm};

/// Relative difference below which two statistics are called similar.
pub const SIMILAR_THRESHOLD: f64 = 0.2;

/// Allowed gap between `overall` and the sum of weighted block scores.
pub const BLOCK_CONSISTENCY_TOLERANCE: f64 = 1e-9;

pub const DEFAULT_MAX_REASONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockScore {
    pub block: Block,
    pub name: &'static str,
    /// `raw` clipped to `[0, 1]`.
    pub score: f64,
    pub raw: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparedStat {
    pub query: f64,
    pub candidate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub leaf_count: ComparedStat,
    pub mean_depth: ComparedStat,
    pub max_depth: ComparedStat,
    pub balance: ComparedStat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    Match,
    Similar,
    Different,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    LeafCount,
    Depth,
    Balance,
    BranchLengths,
}

impl Statistic {
    const ALL: [Statistic; 4] = [
        Statistic::LeafCount,
        Statistic::Depth,
        Statistic::Balance,
        Statistic::BranchLengths,
    ];

    /// The embedding block that carries this statistic.
    pub fn block(self) -> Block {
        match self {
            Statistic::LeafCount => Block::TreeStatistics,
            Statistic::Depth => Block::DepthHistogram,
            Statistic::Balance => Block::SubtreeBalance,
            Statistic::BranchLengths => Block::BranchLengths,
        }
    }

    fn value(self, tree: &Tree) -> f64 {
        let stats = tree.stats();
        match self {
            Statistic::LeafCount => stats.leaf_count as f64,
            Statistic::Depth => stats.mean_depth,
            Statistic::Balance => stats.balance,
            Statistic::BranchLengths => stats.branch.mean,
        }
    }

    fn describe(self, kind: ReasonKind, query: f64, candidate: f64) -> String {
        match (self, kind) {
            (Statistic::LeafCount, ReasonKind::Match) => {
                format!("Both trees have exactly {query} leaves")
            }
            (Statistic::LeafCount, ReasonKind::Similar) => {
                format!("Similar size: {query} vs {candidate} leaves")
            }
            (Statistic::LeafCount, _) => format!("Different sizes: {query} vs {candidate} leaves"),
            (Statistic::Depth, ReasonKind::Match) => format!("Same mean leaf depth ({query:.2})"),
            (Statistic::Depth, ReasonKind::Similar) => {
                format!("Similar depth structure: {query:.2} vs {candidate:.2}")
            }
            (Statistic::Depth, _) => format!("Different depths: {query:.2} vs {candidate:.2}"),
            (Statistic::Balance, ReasonKind::Match) => format!("Same balance ({query:.2})"),
            (Statistic::Balance, ReasonKind::Similar) => {
                format!("Similar branching balance: {query:.2} vs {candidate:.2}")
            }
            (Statistic::Balance, _) => {
                format!("Different branching balance: {query:.2} vs {candidate:.2}")
            }
            (Statistic::BranchLengths, ReasonKind::Match) => {
                format!("Same mean branch length ({query:.4})")
            }
            (Statistic::BranchLengths, ReasonKind::Similar) => {
                format!("Similar branch lengths: {query:.4} vs {candidate:.4}")
            }
            (Statistic::BranchLengths, _) => {
                format!("Different branch lengths: {query:.4} vs {candidate:.4}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reason {
    pub kind: ReasonKind,
    /// `None` only for the summary.
    pub statistic: Option<Statistic>,
    pub text: String,
    pub block_score: Option<f64>,
    /// Relative difference of the two values, `|a - b| / max(|a|, |b|)`.
    pub gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub query: TreeId,
    pub candidate: TreeId,
    pub overall: f64,
    pub blocks: Vec<BlockScore>,
    pub comparison: Comparison,
    pub reasons: Vec<Reason>,
    /// Present only when both trees carry the same unique taxa.
    pub clades: Option<CladeDistances>,
}

impl Explanation {
    /// `Σ weight · raw`; equals `overall` up to rounding.
    pub fn reconstruct(&self) -> f64 {
        self.blocks.iter().map(|b| b.weight * b.raw).sum()
    }

    pub fn block(&self, block: Block) -> Option<&BlockScore> {
        self.blocks.iter().find(|b| b.block == block)
    }
}

fn relative_gap(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 { 0.0 } else { (a - b).abs() / scale }
}

fn summary_text(overall: f64) -> &'static str {
    if overall > 0.8 {
        "Strong structural similarity"
    } else if overall > 0.6 {
        "Moderate structural similarity"
    } else if overall > 0.4 {
        "Some structural similarity"
    } else {
        "Limited structural similarity"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Explainer {
    max_reasons: usize,
}

impl Default for Explainer {
    fn default() -> Self {
        Explainer { max_reasons: DEFAULT_MAX_REASONS }
    }
}

impl Explainer {
    /// `max_reasons` counts the summary, so at least one statistic needs `max_reasons >= 2`.
    pub fn new(max_reasons: usize) -> Self {
        Explainer { max_reasons: max_reasons.max(1) }
    }

    pub fn explain(&self, query: &Tree, candidate: &Tree) -> Explanation {
        let degenerate = query.is_degenerate() || candidate.is_degenerate();
        let (q, c) = (query.embedding(), candidate.embedding());

        let overall = if degenerate { 0.0 } else { cosine(q, c) };
        let blocks: Vec<BlockScore> = Block::ALL
            .iter()
            .map(|&block| block_score(block, q, c, degenerate))
            .collect();

        let reasons = self.reasons(query, candidate, &blocks, overall);
        let explanation = Explanation {
            query: query.id(),
            candidate: candidate.id(),
            overall,
            comparison: compare(query, candidate),
            reasons,
            clades: CladeDistances::between(query, candidate),
            blocks,
        };
        debug!(
            candidate = %candidate.id(),
            overall,
            drift = (explanation.reconstruct() - overall).abs(),
            "explained similarity"
        );
        explanation
    }

    fn reasons(&self, query: &Tree, candidate: &Tree, blocks: &[BlockScore], overall: f64) -> Vec<Reason> {
        let mut reasons: Vec<Reason> = Statistic::ALL
            .iter()
            .map(|&statistic| {
                let (a, b) = (statistic.value(query), statistic.value(candidate));
                let gap = relative_gap(a, b);
                let kind = if a == b {
                    ReasonKind::Match
                } else if gap < SIMILAR_THRESHOLD {
                    ReasonKind::Similar
                } else {
                    ReasonKind::Different
                };
                let block_score = blocks
                    .iter()
                    .find(|s| s.block == statistic.block())
                    .map(|s| s.score);
                Reason {
                    kind,
                    statistic: Some(statistic),
                    text: statistic.describe(kind, a, b),
                    block_score,
                    gap,
                }
            })
            .collect();

        reasons.sort_by(rank_reasons);
        reasons.truncate(self.max_reasons - 1);
        reasons.push(Reason {
            kind: ReasonKind::Summary,
            statistic: None,
            text: summary_text(overall).to_string(),
            block_score: None,
            gap: 0.0,
        });
        reasons
    }
}

fn rank_reasons(a: &Reason, b: &Reason) -> Ordering {
    let different = |r: &Reason| r.kind == ReasonKind::Different;
    match (different(a), different(b)) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => b.gap.total_cmp(&a.gap),
        (false, false) => {
            let score = |r: &Reason| r.block_score.unwrap_or(0.0);
            let is_match = |r: &Reason| r.kind == ReasonKind::Match;
            score(b)
                .total_cmp(&score(a))
                .then(is_match(b).cmp(&is_match(a)))
        }
    }
}

fn block_score(block: Block, q: &[f64], c: &[f64], degenerate: bool) -> BlockScore {
    let range = block.range();
    let (qb, cb) = (&q[range.clone()], &c[range]);
    let (qn, cn) = (l2_norm(qb), l2_norm(cb));

    let (raw, weight) = if degenerate {
        (0.0, 0.0)
    } else if qn == 0.0 && cn == 0.0 {
        // Neither side carries signal here.
        (1.0, 0.0)
    } else if qn == 0.0 || cn == 0.0 {
        (0.0, 0.0)
    } else {
        (dot(qb, cb) / (qn * cn), qn * cn)
    };

    BlockScore {
        block,
        name: block.label(),
        score: raw.clamp(0.0, 1.0),
        raw,
        weight,
    }
}

fn compare(query: &Tree, candidate: &Tree) -> Comparison {
    let (q, c) = (query.stats(), candidate.stats());
    let pair = |query: f64, candidate: f64| ComparedStat { query, candidate };
    Comparison {
        leaf_count: pair(q.leaf_count as f64, c.leaf_count as f64),
        mean_depth: pair(q.mean_depth, c.mean_depth),
        max_depth: pair(q.max_depth as f64, c.max_depth as f64),
        balance: pair(q.balance, c.balance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::build_tree;
    use itertools::Itertools;

    const TREES: [&str; 5] = [
        "((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);",
        "(((A,B),C),D);",
        "((A:1,B:1):1,(C:1,(D:1,E:1):1):1);",
        "(A,B,C,D,E,F);",
        "((((A:0.5,B:0.5):0.5,C:1):0.5,D:1.5):0.5,(E:1,F:1):1);",
    ];

    #[test]
    fn block_scores_reconstruct_overall() {
        let trees: Vec<Tree> = TREES.iter().map(|t| build_tree(t)).collect();
        for (a, b) in trees.iter().tuple_combinations() {
            let e = Explainer::default().explain(a, b);
            assert!(
                (e.reconstruct() - e.overall).abs() < BLOCK_CONSISTENCY_TOLERANCE,
                "{} vs {}",
                e.reconstruct(),
                e.overall
            );
            assert_eq!(e.blocks.len(), 6);
            for block in &e.blocks {
                assert!((0.0..=1.0).contains(&block.score));
            }
        }
    }

    #[test]
    fn identical_trees_match_on_everything() {
        let a = build_tree(TREES[2]);
        let b = build_tree("((C:1,(E:1,D:1):1):1,(B:1,A:1):1);");
        let e = Explainer::default().explain(&a, &b);

        assert!((e.overall - 1.0).abs() < 1e-12);
        assert_eq!(e.reasons.len(), DEFAULT_MAX_REASONS);
        assert!(e.reasons[..4].iter().all(|r| r.kind == ReasonKind::Match));
        let summary = e.reasons.last().unwrap();
        assert_eq!(summary.kind, ReasonKind::Summary);
        assert_eq!(summary.text, "Strong structural similarity");

        let clades = e.clades.unwrap();
        assert_eq!(clades.robinson_foulds, 0);
        assert_eq!(clades.kuhner_felsenstein, 0.0);
    }

    #[test]
    fn reasons_put_differences_last_by_gap() {
        let a = build_tree("((A:1,B:1),(C:1,D:1));");
        let b = build_tree("((((A:9,B:9),C:9),D:9),(E:9,(F:9,(G:9,H:9))));");
        let e = Explainer::default().explain(&a, &b);

        let statistics: Vec<&Reason> = e.reasons.iter().filter(|r| r.statistic.is_some()).collect();
        let first_diff = statistics
            .iter()
            .position(|r| r.kind == ReasonKind::Different)
            .unwrap_or(statistics.len());
        assert!(statistics[first_diff..].iter().all(|r| r.kind == ReasonKind::Different));
        let gaps: Vec<f64> = statistics[first_diff..].iter().map(|r| r.gap).collect();
        assert!(gaps.windows(2).all(|w| w[0] >= w[1]));

        let leaves = statistics.iter().find(|r| r.statistic == Some(Statistic::LeafCount)).unwrap();
        assert_eq!(leaves.kind, ReasonKind::Different);
        assert_eq!(leaves.text, "Different sizes: 4 vs 8 leaves");
        assert!(e.clades.is_none());
    }

    #[test]
    fn reasons_are_capped_with_trailing_summary() {
        let a = build_tree(TREES[0]);
        let b = build_tree(TREES[4]);
        let e = Explainer::new(3).explain(&a, &b);
        assert_eq!(e.reasons.len(), 3);
        assert_eq!(e.reasons[2].kind, ReasonKind::Summary);

        let only_summary = Explainer::new(1).explain(&a, &b);
        assert_eq!(only_summary.reasons.len(), 1);
    }

    #[test]
    fn degenerate_trees_score_zero() {
        let single = build_tree("A;");
        let quartet = build_tree(TREES[0]);
        let e = Explainer::default().explain(&single, &quartet);
        assert_eq!(e.overall, 0.0);
        assert!(e.blocks.iter().all(|b| b.score == 0.0 && b.weight == 0.0));
        assert_eq!(e.reasons.last().unwrap().text, "Limited structural similarity");
    }

    #[test]
    fn empty_blocks_on_both_sides_score_one() {
        // No branch lengths anywhere: the branch block is zero in both embeddings.
        let a = build_tree("((A,B),(C,D));");
        let b = build_tree("(((A,B),C),D);");
        let e = Explainer::default().explain(&a, &b);
        let branch = e.block(Block::BranchLengths).unwrap();
        assert_eq!(branch.score, 1.0);
        assert_eq!(branch.weight, 0.0);
    }

    #[test]
    fn relative_gap_handles_zero() {
        assert_eq!(relative_gap(0.0, 0.0), 0.0);
        assert_eq!(relative_gap(4.0, 5.0), 0.2);
        assert_eq!(summary_text(0.7), "Moderate structural similarity");
        assert_eq!(summary_text(0.5), "Some structural similarity");
    }
}

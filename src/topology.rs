//! Whole-tree topology embedding.
//!
//! # Layout
//! A tree becomes one 256-dimensional vector made of six blocks, each filled independently;
//! the full vector is then L2-normalised.
//!
//! | Block               | Range    | Content |
//! |---------------------|----------|---------|
//! | Tree statistics     | 0..32    | leaf/internal/total counts, min/mean/max/variance of leaf depth |
//! | Depth histogram     | 32..64   | share of leaves at depth 0..31 (deeper leaves land in 31) |
//! | Subtree balance     | 64..96   | min/max child size per internal node, then mean/variance filler |
//! | Split patterns      | 96..160  | child count and largest-child share per internal node |
//! | Topology hash       | 160..224 | smoothed bucket counts of (child count, subtree size) |
//! | Branch length stats | 224..256 | mean/variance/min/max/total edge length + histogram |
//!
//! Internal nodes are visited in canonical post-order, so two trees that only differ in
//! sibling order in their Newick text produce bit-identical vectors.
//!
//! # Degenerate trees
//! Trees with fewer than two leaves carry no branching structure and encode as the zero
//! vector; cosine similarity against them is `0.0`.

use std::ops::Range;

use serde::Serialize;
use tracing::debug;

use crate::canonical::CanonicalTree;
use crate::stats::{TreeStats, mean_variance};
use crate::vector::normalize;

pub const TOPOLOGY_DIM: usize = 256;

/// Count scaling keeps the statistics block in the same range as the histogram blocks.
const LEAF_SCALE: f64 = 50.0;
const TOTAL_SCALE: f64 = 100.0;
const DEPTH_SCALE: f64 = 20.0;
/// Branch features are damped so topology dominates the score.
const BRANCH_SCALE: f64 = 0.1;
const BRANCH_TOTAL_SCALE: f64 = 0.01;
const BRANCH_BUCKETS: usize = 27;

/// One of the six fixed slices of the topology embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Block {
    TreeStatistics,
    DepthHistogram,
    SubtreeBalance,
    SplitPatterns,
    TopologyHash,
    BranchLengths,
}

impl Block {
    pub const ALL: [Block; 6] = [
        Block::TreeStatistics,
        Block::DepthHistogram,
        Block::SubtreeBalance,
        Block::SplitPatterns,
        Block::TopologyHash,
        Block::BranchLengths,
    ];

    pub fn range(self) -> Range<usize> {
        match self {
            Block::TreeStatistics => 0..32,
            Block::DepthHistogram => 32..64,
            Block::SubtreeBalance => 64..96,
            Block::SplitPatterns => 96..160,
            Block::TopologyHash => 160..224,
            Block::BranchLengths => 224..256,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Block::TreeStatistics => "Tree statistics",
            Block::DepthHistogram => "Depth distribution",
            Block::SubtreeBalance => "Subtree balance",
            Block::SplitPatterns => "Split patterns",
            Block::TopologyHash => "Topology",
            Block::BranchLengths => "Branch lengths",
        }
    }
}

/// FNV-1a over the little-endian bytes of `words`. Fixed constants, so stable across runs.
fn fnv1a(words: &[u64]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for word in words {
        for byte in word.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

/// Stateless encoder; see the module docs for the layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologyEncoder;

impl TopologyEncoder {
    pub fn encode(&self, tree: &CanonicalTree, stats: &TreeStats) -> Vec<f64> {
        let mut embedding = vec![0.0; TOPOLOGY_DIM];
        if stats.leaf_count < 2 {
            return embedding;
        }

        let post_order = tree.post_order();
        let internal: Vec<usize> = post_order
            .iter()
            .copied()
            .filter(|&i| !tree.nodes()[i].is_leaf())
            .collect();

        tree_statistics(&mut embedding[Block::TreeStatistics.range()], stats);
        depth_histogram(&mut embedding[Block::DepthHistogram.range()], tree);
        subtree_balance(&mut embedding[Block::SubtreeBalance.range()], &stats.balance_ratios);
        split_patterns(&mut embedding[Block::SplitPatterns.range()], tree, &internal);
        topology_hash(&mut embedding[Block::TopologyHash.range()], tree, &post_order);
        branch_lengths(&mut embedding[Block::BranchLengths.range()], tree, stats);

        let norm = normalize(&mut embedding);
        debug!(leaves = stats.leaf_count, norm, "encoded topology");
        embedding
    }
}

fn tree_statistics(block: &mut [f64], stats: &TreeStats) {
    block[0] = stats.leaf_count as f64 / LEAF_SCALE;
    block[1] = stats.internal_count as f64 / LEAF_SCALE;
    block[2] = stats.node_count as f64 / TOTAL_SCALE;
    block[3] = stats.min_depth as f64 / DEPTH_SCALE;
    block[4] = stats.mean_depth / DEPTH_SCALE;
    block[5] = stats.max_depth as f64 / DEPTH_SCALE;
    block[6] = stats.depth_variance / (DEPTH_SCALE * DEPTH_SCALE);
}

fn depth_histogram(block: &mut [f64], tree: &CanonicalTree) {
    let last = block.len() - 1;
    let mut leaves = 0usize;
    for i in tree.leaves() {
        block[tree.nodes()[i].depth.min(last)] += 1.0;
        leaves += 1;
    }
    for slot in block.iter_mut() {
        *slot /= leaves as f64;
    }
}

/// Ratios first; when there are fewer ratios than slots the rest alternate mean, variance.
fn subtree_balance(block: &mut [f64], ratios: &[f64]) {
    let taken = ratios.len().min(block.len());
    block[..taken].copy_from_slice(&ratios[..taken]);
    if taken < block.len() {
        let (mean, variance) = mean_variance(&ratios[..taken]);
        for (offset, slot) in block[taken..].iter_mut().enumerate() {
            *slot = if offset % 2 == 0 { mean } else { variance };
        }
    }
}

/// Two values per internal node: child count / 10 and the largest child's leaf share.
fn split_patterns(block: &mut [f64], tree: &CanonicalTree, internal: &[usize]) {
    let nodes = tree.nodes();
    for (pair, &idx) in block.chunks_exact_mut(2).zip(internal) {
        let node = &nodes[idx];
        let largest = node.children.iter().map(|&c| nodes[c].leaf_count).max().unwrap_or(0);
        pair[0] = node.children.len() as f64 / 10.0;
        pair[1] = largest as f64 / node.leaf_count as f64;
    }
}

fn topology_hash(block: &mut [f64], tree: &CanonicalTree, post_order: &[usize]) {
    let buckets = block.len();
    for &idx in post_order {
        let node = &tree.nodes()[idx];
        let bucket = (fnv1a(&[node.children.len() as u64, node.leaf_count as u64]) % buckets as u64) as usize;
        block[bucket] += 1.0;
        block[(bucket + 1) % buckets] += 0.5;
        block[(bucket + buckets - 1) % buckets] += 0.5;
    }
    let max = block.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        for slot in block.iter_mut() {
            *slot /= max;
        }
    }
}

fn branch_lengths(block: &mut [f64], tree: &CanonicalTree, stats: &TreeStats) {
    let branch = &stats.branch;
    if branch.edges == 0 {
        return;
    }
    block[0] = branch.mean * BRANCH_SCALE;
    block[1] = branch.variance * BRANCH_SCALE;
    block[2] = branch.min * BRANCH_SCALE;
    block[3] = branch.max * BRANCH_SCALE;
    block[4] = branch.total * BRANCH_SCALE * BRANCH_TOTAL_SCALE;

    if branch.max > 0.0 {
        let weight = BRANCH_SCALE / branch.edges as f64;
        let histogram = &mut block[5..5 + BRANCH_BUCKETS];
        for node in tree.nodes().iter().skip(1) {
            let scaled = node.branch_length / branch.max * (BRANCH_BUCKETS - 1) as f64;
            histogram[(scaled as usize).min(BRANCH_BUCKETS - 1)] += weight;
        }
    }
}

/// Embedding of an already canonical tree, computing its statistics on the way.
pub fn embed(tree: &CanonicalTree) -> Vec<f64> {
    TopologyEncoder.encode(tree, &TreeStats::compute(tree))
}

//! Per-node position embedding.
//!
//! Every node gets a 64-dimensional vector with three parts:
//!
//! ```text
//!  0..16   sin/cos of depth at 8 geometric frequencies
//! 16..48   path: scatter of the child-index choices from the root
//! 48..64   sin/cos of cumulative branch length from the root (x10)
//! ```
//!
//! The path part is a seeded random projection. Step `p` of a root-to-node path, taking child
//! number `c`, seeds a ChaCha8 stream from `(seed, p, c)` and adds `1 / (p + 1)` with a random
//! sign to four random slots. ChaCha8 yields the same stream for a seed on every platform, so
//! the vectors are reproducible byte for byte given the same seed.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::canonical::CanonicalTree;
use crate::vector::normalize;

pub const POSITION_DIM: usize = 64;

/// ASCII "PHYLOFP1".
pub const PATH_SEED: u64 = 0x5048_594C_4F46_5031;

const DEPTH_DIMS: usize = 16;
const PATH_DIMS: usize = 32;
const BRANCH_DIMS: usize = 16;
const PATH_TAPS: usize = 4;
const BRANCH_SCALE: f64 = 10.0;

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Pair k of `out` holds `(sin, cos)` of `value / 10000^(2k / out.len())`.
fn sinusoid(out: &mut [f64], value: f64) {
    let dims = out.len() as f64;
    for (k, pair) in out.chunks_exact_mut(2).enumerate() {
        let angle = value / 10000f64.powf((2 * k) as f64 / dims);
        pair[0] = angle.sin();
        pair[1] = angle.cos();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionEncoder {
    seed: u64,
}

impl Default for PositionEncoder {
    fn default() -> Self {
        PositionEncoder { seed: PATH_SEED }
    }
}

impl PositionEncoder {
    pub fn with_seed(seed: u64) -> Self {
        PositionEncoder { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn path_step(&self, path: &mut [f64], step: usize, child: usize) {
        let stream_seed =
            splitmix64(self.seed ^ splitmix64(step as u64) ^ (splitmix64(child as u64 + 1) << 1));
        let mut rng = ChaCha8Rng::seed_from_u64(stream_seed);
        let weight = 1.0 / (step as f64 + 1.0);
        for _ in 0..PATH_TAPS {
            let draw = rng.next_u64();
            let slot = (draw % PATH_DIMS as u64) as usize;
            let sign = if draw >> 63 == 1 { -1.0 } else { 1.0 };
            path[slot] += sign * weight;
        }
    }

    /// Position vectors for every node, indexed like the arena.
    pub fn encode_all(&self, tree: &CanonicalTree) -> Vec<Vec<f64>> {
        let nodes = tree.nodes();
        let mut paths = vec![[0.0; PATH_DIMS]; nodes.len()];
        let mut cumulative = vec![0.0; nodes.len()];

        // Pre-order puts every parent before its children, so one forward pass suffices.
        for (idx, node) in nodes.iter().enumerate() {
            for (c, &child) in node.children.iter().enumerate() {
                let mut path = paths[idx];
                self.path_step(&mut path, node.depth, c);
                paths[child] = path;
                cumulative[child] = cumulative[idx] + nodes[child].branch_length;
            }
        }

        nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                let mut v = vec![0.0; POSITION_DIM];
                sinusoid(&mut v[..DEPTH_DIMS], node.depth as f64);
                v[DEPTH_DIMS..DEPTH_DIMS + PATH_DIMS].copy_from_slice(&paths[idx]);
                sinusoid(
                    &mut v[DEPTH_DIMS + PATH_DIMS..DEPTH_DIMS + PATH_DIMS + BRANCH_DIMS],
                    cumulative[idx] * BRANCH_SCALE,
                );
                normalize(&mut v);
                v
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse;
    use crate::vector::{cosine, l2_norm};

    #[test]
    fn one_unit_vector_per_node() {
        let tree = parse("((A:1,B:2):0.5,(C,D));").unwrap();
        let positions = PositionEncoder::default().encode_all(&tree);
        assert_eq!(positions.len(), tree.len());
        for v in &positions {
            assert_eq!(v.len(), POSITION_DIM);
            assert!((l2_norm(v) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn root_has_empty_path() {
        let tree = parse("(A,B);").unwrap();
        let root = &PositionEncoder::default().encode_all(&tree)[0];
        assert!(root[DEPTH_DIMS..DEPTH_DIMS + PATH_DIMS].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn reproducible_and_seed_dependent() {
        let tree = parse("(((A,B),C),(D,E));").unwrap();
        let a = PositionEncoder::default().encode_all(&tree);
        let b = PositionEncoder::default().encode_all(&tree);
        assert_eq!(a, b);

        let other = PositionEncoder::with_seed(7).encode_all(&tree);
        assert_ne!(a[2], other[2]);
    }

    #[test]
    fn siblings_get_distinct_paths() {
        // Same depth, same cumulative length: only the path block differs.
        let tree = parse("(A:1,B:1);").unwrap();
        let positions = PositionEncoder::default().encode_all(&tree);
        assert_ne!(positions[1], positions[2]);
        assert!(cosine(&positions[1], &positions[2]) < 1.0);
    }

    #[test]
    fn same_path_in_different_trees_matches() {
        let small = parse("((A,B),C);").unwrap();
        let large = parse("((A,B),(C,D));").unwrap();
        let enc = PositionEncoder::default();
        // Node 2 is A in both: root -> child 0 -> child 0, no branch lengths.
        assert_eq!(enc.encode_all(&small)[2], enc.encode_all(&large)[2]);
    }

    fn scatter(path: &[f64]) -> Vec<(usize, u64)> {
        path.iter().enumerate().filter(|(_, v)| **v != 0.0).map(|(i, v)| (i, v.to_bits())).collect()
    }

    #[test]
    fn path_projection_is_pinned() {
        let enc = PositionEncoder::default();
        let (one, minus_one) = (1.0f64.to_bits(), (-1.0f64).to_bits());
        let (half, minus_half) = (0.5f64.to_bits(), (-0.5f64).to_bits());

        let mut first = [0.0; PATH_DIMS];
        enc.path_step(&mut first, 0, 0);
        assert_eq!(scatter(&first), vec![(4, minus_one), (7, one), (24, one), (31, one)]);

        let mut second = [0.0; PATH_DIMS];
        enc.path_step(&mut second, 0, 1);
        assert_eq!(scatter(&second), vec![(8, minus_one), (23, one), (24, one), (31, minus_one)]);

        // Two taps of the second step land on slot 6.
        let mut deeper = [0.0; PATH_DIMS];
        enc.path_step(&mut deeper, 1, 0);
        assert_eq!(scatter(&deeper), vec![(6, minus_one), (17, half), (24, minus_half)]);

        enc.path_step(&mut first, 1, 1);
        assert_eq!(
            scatter(&first),
            vec![
                (4, (-1.5f64).to_bits()),
                (7, one),
                (16, half),
                (22, minus_half),
                (24, one),
                (29, minus_half),
                (31, one),
            ]
        );
    }

    #[test]
    fn first_child_position_has_pinned_path_slots() {
        let tree = parse("(A,B);").unwrap();
        let a = &PositionEncoder::default().encode_all(&tree)[1];
        let path = &a[DEPTH_DIMS..DEPTH_DIMS + PATH_DIMS];
        let slots: Vec<usize> = scatter(path).into_iter().map(|(i, _)| i).collect();
        assert_eq!(slots, vec![4, 7, 24, 31]);
        // Normalisation scales every slot by the same factor.
        assert_eq!(path[7].to_bits(), path[24].to_bits());
        assert_eq!(path[24].to_bits(), path[31].to_bits());
        assert_eq!(path[4].to_bits(), (-path[7]).to_bits());
    }

    #[test]
    fn splitmix_is_a_bijection_sample() {
        assert_ne!(splitmix64(0), splitmix64(1));
        assert_eq!(splitmix64(0), 0xE220_A839_7B1D_CDAF);
    }
}

//! Fixed-width bitset over leaf indices, used for clade (bipartition) comparison.
//!
//! # Example
//! For a tree with taxa [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Clade {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Clade {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// Leaf set packed into `u64` words, 64 taxa per word.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// All-zero bitset with room for `words * 64` taxa.
    ///
    /// ```
    /// # use phylo_fingerprint::bitset::Bitset;
    /// let words = Bitset::words_for(100);
    /// assert_eq!(Bitset::zeros(words).0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Words needed to hold `taxa` bits.
    pub fn words_for(taxa: usize) -> usize {
        taxa.div_ceil(64)
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        self.0[idx >> 6] |= 1u64 << (idx & 63);
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        self.0
            .get(idx >> 6)
            .is_some_and(|w| w & (1u64 << (idx & 63)) != 0)
    }

    /// Union in place: `self` becomes `self ∪ other`.
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The other side of the split: every taxon below `taxa` that is not in `self`.
    ///
    /// ```
    /// # use phylo_fingerprint::bitset::Bitset;
    /// let mut ab = Bitset::zeros(1);
    /// ab.set(0);
    /// ab.set(1);
    /// assert_eq!(ab.complement(4).0[0], 0b1100);
    /// ```
    pub fn complement(&self, taxa: usize) -> Bitset {
        let mut out = Bitset(self.0.iter().map(|w| !w).collect());
        let tail = taxa & 63;
        if tail != 0 {
            if let Some(last) = out.0.get_mut(taxa >> 6) {
                *last &= (1u64 << tail) - 1;
            }
        }
        for word in out.0.iter_mut().skip(taxa.div_ceil(64)) {
            *word = 0;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_contains() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.0[0], 0b0101);
        assert!(bs.contains(2));
        assert!(!bs.contains(1));
        assert!(!bs.contains(500));
    }

    /// ```text
    ///           root
    ///          /    \
    ///        node1   D
    ///        /   \
    ///       A    node2
    ///            /   \
    ///           B     C
    /// ```
    /// Taxa A=0, B=1, C=2, D=3: node2 = `0b0110`, node1 = `0b0111`.
    #[test]
    fn union_builds_clades_bottom_up() {
        let mut node2 = Bitset::zeros(1);
        node2.set(1);
        node2.set(2);
        assert_eq!(node2.count_ones(), 2);

        let mut node1 = Bitset::zeros(1);
        node1.set(0);
        node1.or_assign(&node2);
        assert_eq!(node1.0[0], 0b0111);
        assert_eq!(node1.complement(4).0[0], 0b1000);
    }

    #[test]
    fn spans_multiple_words() {
        let mut bs = Bitset::zeros(Bitset::words_for(128));
        bs.set(0);
        bs.set(63);
        bs.set(64);
        bs.set(127);

        assert_eq!(bs.count_ones(), 4);
        assert_eq!(bs.0[1], 1u64 | (1u64 << 63));

        let complement = bs.complement(100);
        assert_eq!(complement.count_ones(), 100 - 3);
        assert!(!complement.contains(64));
        assert!(!complement.contains(120));
    }
}

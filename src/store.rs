//! Tree persistence and similarity ranking.
//!
//! [`TreeRepository`] is the seam to the production store and its vector index. The crate
//! ships [`MemoryRepository`], a `DashMap`-backed store whose `rank` is an exact linear scan;
//! it backs the CLI, the Python bindings and the tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{Error, RankError, Result};
use crate::tree::{Tree, TreeId, TreeSummary};
use crate::vector::cosine;

/// One ranked candidate from [`TreeRepository::rank`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub tree: TreeId,
    pub score: f64,
}

pub trait TreeRepository: Send + Sync {
    /// Store a fully built tree. Fails if the id is already taken.
    fn insert(&self, tree: Arc<Tree>) -> Result<()>;

    fn get(&self, id: TreeId) -> Option<Arc<Tree>>;

    /// Remove a tree with all of its nodes; `false` if it was not present.
    fn delete(&self, id: TreeId) -> bool;

    /// Summaries ordered by creation time, oldest first.
    fn list(&self) -> Vec<TreeSummary>;

    /// Up to `k` trees ordered by descending similarity to `query`.
    ///
    /// Must finish within `timeout` or fail; a partial ranking is never returned.
    fn rank(&self, query: &[f64], k: usize, timeout: Duration) -> std::result::Result<Vec<Ranked>, RankError>;
}

/// In-memory repository. O(n) ranking, no persistence.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    trees: DashMap<TreeId, Arc<Tree>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Deadline checks happen every this many candidates.
const DEADLINE_STRIDE: usize = 64;

impl TreeRepository for MemoryRepository {
    fn insert(&self, tree: Arc<Tree>) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.trees.entry(tree.id()) {
            Entry::Occupied(_) => Err(Error::InvalidArgument(format!(
                "tree {} already exists",
                tree.id()
            ))),
            Entry::Vacant(slot) => {
                info!(tree = %tree.id(), leaves = tree.leaf_count(), "stored tree");
                slot.insert(tree);
                Ok(())
            }
        }
    }

    fn get(&self, id: TreeId) -> Option<Arc<Tree>> {
        self.trees.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn delete(&self, id: TreeId) -> bool {
        self.trees.remove(&id).is_some()
    }

    fn list(&self) -> Vec<TreeSummary> {
        let mut summaries: Vec<TreeSummary> =
            self.trees.iter().map(|entry| entry.value().summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    fn rank(&self, query: &[f64], k: usize, timeout: Duration) -> std::result::Result<Vec<Ranked>, RankError> {
        let started = Instant::now();
        let mut ranked = Vec::with_capacity(self.trees.len());
        for (i, entry) in self.trees.iter().enumerate() {
            if i % DEADLINE_STRIDE == 0 && started.elapsed() > timeout {
                return Err(RankError::Timeout(timeout));
            }
            ranked.push(Ranked {
                tree: *entry.key(),
                score: cosine(query, entry.value().embedding()),
            });
        }
        if started.elapsed() > timeout {
            return Err(RankError::Timeout(timeout));
        }

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.tree.cmp(&b.tree)));
        ranked.truncate(k);
        debug!(scanned = self.trees.len(), returned = ranked.len(), "ranked trees");
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::build_tree;

    #[test]
    fn crud_round_trip() {
        let repo = MemoryRepository::new();
        let tree = Arc::new(build_tree("((A,B),C);"));
        let id = tree.id();

        repo.insert(Arc::clone(&tree)).unwrap();
        assert_eq!(repo.len(), 1);
        assert!(Arc::ptr_eq(&repo.get(id).unwrap(), &tree));
        assert!(matches!(repo.insert(tree), Err(Error::InvalidArgument(_))));

        assert_eq!(repo.list()[0].id, id);
        assert!(repo.delete(id));
        assert!(!repo.delete(id));
        assert!(repo.get(id).is_none());
        assert!(repo.is_empty());
    }

    #[test]
    fn rank_orders_by_similarity() {
        let repo = MemoryRepository::new();
        let query = build_tree("((A,B),(C,D));");
        let twin = Arc::new(build_tree("((W,X),(Y,Z));"));
        let other = Arc::new(build_tree("(((((A,B),C),D),E),F);"));
        repo.insert(Arc::clone(&twin)).unwrap();
        repo.insert(Arc::clone(&other)).unwrap();

        let ranked = repo.rank(query.embedding(), 10, Duration::from_secs(5)).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].tree, twin.id());
        assert!(ranked[0].score > ranked[1].score);

        let top = repo.rank(query.embedding(), 1, Duration::from_secs(5)).unwrap();
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn zero_timeout_fails_instead_of_partial_result() {
        let repo = MemoryRepository::new();
        repo.insert(Arc::new(build_tree("(A,B);"))).unwrap();
        let err = repo.rank(&[0.0; 256], 5, Duration::ZERO);
        assert!(matches!(err, Err(RankError::Timeout(_))));
    }
}

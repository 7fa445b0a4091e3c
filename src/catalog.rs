//! The tree catalog: ingestion, lookup, navigation, similarity search and explanation.
//!
//! [`Catalog`] ties the pure pieces together around a [`TreeRepository`]:
//!
//! ```text
//! ingest:   text ─▶ parse ─▶ canonical order ─▶ stats ─▶ topology + positions ─▶ insert
//! search:   text ─▶ parse ─▶ topology ─▶ rank(k) ─▶ hits
//! explain:  text ─▶ transient tree ─┐
//!           candidate id ─▶ get ────┴─▶ Explainer
//! ```
//!
//! Ingestion is all-or-nothing. The repository insert is the last step and receives a
//! finished tree, so a failure earlier never leaves anything behind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use crate::explain::{Explainer, Explanation};
use crate::navigator::{Navigator, RelatedLeaf, Subtree};
use crate::newick::{ParseOptions, parse_with};
use crate::position::PositionEncoder;
use crate::stats::TreeStats;
use crate::store::{MemoryRepository, TreeRepository};
use crate::topology::TopologyEncoder;
use crate::tree::{IdGenerator, Node, NodeId, Tree, TreeId, TreeParts, TreeSummary, UuidGenerator};

/// Optional extras for [`Catalog::ingest_with`].
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// NEXUS `TRANSLATE` table applied to leaf labels before canonical ordering.
    pub translate: Option<HashMap<String, String>>,
    /// Leaf label → external sequence record id.
    pub sequence_refs: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub enum SearchQuery<'a> {
    Newick(&'a str),
    /// An already ingested tree; it is left out of its own results.
    Tree(TreeId),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub tree: Arc<Tree>,
    pub score: f64,
}

/// Run the full ingestion pipeline without touching any repository.
pub(crate) fn build_tree(
    id: TreeId,
    name: &str,
    text: &str,
    options: &IngestOptions,
    positions: &PositionEncoder,
) -> Result<Tree> {
    let parse_options = ParseOptions { translate: options.translate.as_ref() };
    let shape = parse_with(text, &parse_options)?;
    let stats = TreeStats::compute(&shape);
    let embedding = TopologyEncoder.encode(&shape, &stats);
    let positions = positions.encode_all(&shape);

    Ok(Tree::assemble(TreeParts {
        id,
        name: name.to_string(),
        shape,
        stats,
        embedding,
        positions,
        sequence_refs: options.sequence_refs.clone(),
        created_at: Utc::now(),
    }))
}

pub struct Catalog<R = MemoryRepository, G = UuidGenerator> {
    repository: R,
    ids: G,
    config: CatalogConfig,
    positions: PositionEncoder,
    explainer: Explainer,
}

impl Catalog {
    /// Catalog over a fresh [`MemoryRepository`] with random tree ids.
    pub fn in_memory(config: CatalogConfig) -> Result<Self> {
        Catalog::new(MemoryRepository::new(), UuidGenerator, config)
    }
}

impl<R: TreeRepository, G: IdGenerator> Catalog<R, G> {
    pub fn new(repository: R, ids: G, config: CatalogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Catalog {
            positions: PositionEncoder::with_seed(config.path_seed),
            explainer: Explainer::new(config.max_reasons),
            repository,
            ids,
            config,
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn ingest(&self, text: &str, name: &str) -> Result<Arc<Tree>> {
        self.ingest_with(text, name, &IngestOptions::default())
    }

    pub fn ingest_with(&self, text: &str, name: &str, options: &IngestOptions) -> Result<Arc<Tree>> {
        let id = self.ids.next_tree_id();
        let tree = Arc::new(build_tree(id, name, text, options, &self.positions)?);
        self.repository.insert(Arc::clone(&tree))?;
        info!(tree = %id, name, leaves = tree.leaf_count(), nodes = tree.node_count(), "ingested tree");
        Ok(tree)
    }

    /// Ingest `(name, newick)` pairs in parallel. Results keep input order; each item
    /// succeeds or fails on its own.
    pub fn ingest_batch(&self, items: &[(String, String)], options: &IngestOptions) -> Vec<Result<Arc<Tree>>> {
        items
            .par_iter()
            .map(|(name, text)| self.ingest_with(text, name, options))
            .collect()
    }

    pub fn get(&self, id: TreeId) -> Result<Arc<Tree>> {
        self.repository.get(id).ok_or(Error::TreeNotFound(id))
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<TreeSummary> {
        let mut all = self.repository.list();
        if let Some(limit) = limit {
            all.truncate(limit);
        }
        all
    }

    pub fn delete(&self, id: TreeId) -> Result<()> {
        if !self.repository.delete(id) {
            return Err(Error::TreeNotFound(id));
        }
        info!(tree = %id, "deleted tree");
        Ok(())
    }

    pub fn ancestors(&self, tree: TreeId, node: NodeId, max_depth: Option<usize>) -> Result<Vec<Node>> {
        let tree = self.get(tree)?;
        let found = Navigator::new(&tree).ancestors(node, max_depth)?;
        Ok(found.into_iter().cloned().collect())
    }

    pub fn descendants(
        &self,
        tree: TreeId,
        node: NodeId,
        leaves_only: bool,
        max_depth: Option<usize>,
    ) -> Result<Vec<Node>> {
        let tree = self.get(tree)?;
        let found = Navigator::new(&tree).descendants(node, leaves_only, max_depth)?;
        Ok(found.into_iter().cloned().collect())
    }

    pub fn lca(&self, tree: TreeId, a: NodeId, b: NodeId) -> Result<Node> {
        let tree = self.get(tree)?;
        Navigator::new(&tree).lca(a, b).cloned()
    }

    pub fn subtree_extract(&self, tree: TreeId, node: NodeId) -> Result<Subtree> {
        let tree = self.get(tree)?;
        Navigator::new(&tree).subtree_extract(node, self.config.newick_precision)
    }

    pub fn related_leaves(&self, tree: TreeId, node: NodeId, max_edges: usize) -> Result<Vec<RelatedLeaf>> {
        let tree = self.get(tree)?;
        Navigator::new(&tree).related_leaves(node, max_edges)
    }

    /// Trees most similar to `query`, best first.
    ///
    /// A degenerate query (fewer than two leaves) has no meaningful neighbours and returns
    /// no hits.
    ///
    /// # Errors
    /// `SearchUnavailable` if ranking fails or exceeds the configured timeout.
    pub fn search_similar(&self, query: SearchQuery<'_>, limit: usize) -> Result<Vec<SearchHit>> {
        let (embedding, exclude) = match query {
            SearchQuery::Newick(text) => {
                let shape = parse_with(text, &ParseOptions::default())?;
                let stats = TreeStats::compute(&shape);
                if stats.leaf_count < 2 {
                    return Ok(Vec::new());
                }
                (TopologyEncoder.encode(&shape, &stats), None)
            }
            SearchQuery::Tree(id) => {
                let tree = self.get(id)?;
                if tree.is_degenerate() {
                    return Ok(Vec::new());
                }
                (tree.embedding().to_vec(), Some(id))
            }
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let k = limit.saturating_add(usize::from(exclude.is_some()));
        let ranked = self
            .repository
            .rank(&embedding, k, self.config.search_timeout())
            .map_err(|e| {
                warn!(error = %e, "similarity ranking failed");
                Error::SearchUnavailable(e)
            })?;

        let hits: Vec<SearchHit> = ranked
            .into_iter()
            .filter(|r| Some(r.tree) != exclude)
            // A tree deleted between ranking and lookup is simply dropped.
            .filter_map(|r| self.repository.get(r.tree).map(|tree| SearchHit { tree, score: r.score }))
            .take(limit)
            .collect();
        debug!(hits = hits.len(), limit, "similarity search");
        Ok(hits)
    }

    /// Explain the similarity between Newick `query` and the stored tree `candidate`.
    pub fn explain_similarity(&self, query: &str, candidate: TreeId) -> Result<Explanation> {
        let candidate = self.get(candidate)?;
        let query = build_tree(
            self.ids.next_tree_id(),
            "query",
            query,
            &IngestOptions::default(),
            &self.positions,
        )?;
        Ok(self.explainer.explain(&query, &candidate))
    }
}

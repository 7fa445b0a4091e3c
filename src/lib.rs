//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `newick` / `canonical`: parsing into a canonically ordered arena tree.
//! - `stats`, `topology`, `position`: per-tree statistics, the 256-d topology embedding and
//!   the 64-d node position vectors.
//! - `tree`: the immutable ingested [`Tree`] with its ids and nodes.
//! - `navigator`: ancestors, descendants, LCA, subtree extraction and related leaves.
//! - `explain`: per-block similarity breakdown with ranked reasons.
//! - `bitset` / `snapshot` / `distances`: clade splits and RF / weighted RF / KF distances.
//! - `store`: the repository seam plus an in-memory implementation.
//! - `catalog`: the service facade over all of the above.
//! - `config`, `error`, `io`, `vector`: configuration, errors, tree files and vector helpers.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod canonical;
pub mod catalog;
pub mod config;
pub mod distances;
pub mod error;
pub mod explain;
pub mod io;
pub mod navigator;
pub mod newick;
pub mod position;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod topology;
pub mod tree;
pub mod vector;

#[cfg(feature = "python")]
pub mod api;

#[cfg(test)]
mod test_support;

pub use catalog::{Catalog, IngestOptions, SearchHit, SearchQuery};
pub use config::CatalogConfig;
pub use error::{Error, ParseError, ParseErrorKind, Result};
pub use explain::{Explainer, Explanation};
pub use store::{MemoryRepository, TreeRepository};
pub use tree::{Node, NodeId, Tree, TreeId};

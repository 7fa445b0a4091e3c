//! Catalog configuration, loadable from TOML.
//!
//! ```toml
//! search_timeout_ms = 2000
//! max_reasons = 4
//! newick_precision = 8
//! path_seed = 42
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::explain::DEFAULT_MAX_REASONS;
use crate::newick::DEFAULT_PRECISION;
use crate::position::PATH_SEED;

/// Largest precision that still changes the printed value of an `f64`.
const MAX_PRECISION: usize = 17;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// Budget for one ranking call.
    pub search_timeout_ms: u64,
    /// Reasons per explanation, including the trailing summary.
    pub max_reasons: usize,
    /// Decimals for branch lengths in extracted Newick.
    pub newick_precision: usize,
    /// Seed of the node position path projection. Changing it changes every position vector.
    pub path_seed: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            search_timeout_ms: 5_000,
            max_reasons: DEFAULT_MAX_REASONS,
            newick_precision: DEFAULT_PRECISION,
            path_seed: PATH_SEED,
        }
    }
}

impl CatalogConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CatalogConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_reasons == 0 {
            return Err(Error::Config("max_reasons must be at least 1".into()));
        }
        if self.newick_precision > MAX_PRECISION {
            return Err(Error::Config(format!(
                "newick_precision must be at most {MAX_PRECISION}, got {}",
                self.newick_precision
            )));
        }
        Ok(())
    }
}

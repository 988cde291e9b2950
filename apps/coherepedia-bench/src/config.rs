//! Benchmark configuration.

use coherepedia_index::{ConfigError, IndexConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Index settings plus the shape of the synthetic workload.
///
/// Example YAML:
/// ```yaml
/// index_dir: "./bench-index"
/// dimension: 1024
/// rows: 100000
/// shards: 8
/// queries: 1000
/// top_k: 100
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(flatten)]
    pub index: IndexConfig,

    /// Synthetic rows to index when no index exists yet
    #[serde(default = "default_rows")]
    pub rows: usize,

    /// Dataset shards, processed in parallel
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Random queries to run
    #[serde(default = "default_queries")]
    pub queries: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Seed for rows and queries
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_rows() -> usize {
    100_000
}

fn default_shards() -> usize {
    8
}

fn default_queries() -> usize {
    1_000
}

fn default_top_k() -> usize {
    100
}

fn default_seed() -> u64 {
    7
}

impl BenchConfig {
    /// Defaults for everything, indexing into `index_dir`.
    pub fn with_defaults(index_dir: impl AsRef<Path>, dimension: usize) -> Self {
        Self {
            index: IndexConfig::new(index_dir.as_ref(), dimension),
            rows: default_rows(),
            shards: default_shards(),
            queries: default_queries(),
            top_k: default_top_k(),
            seed: default_seed(),
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: BenchConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.index.validate()?;
        if self.shards == 0 {
            return Err(ConfigError::InvalidField("shards must be > 0".to_string()));
        }
        if self.rows == 0 {
            return Err(ConfigError::InvalidField("rows must be > 0".to_string()));
        }
        Ok(())
    }
}

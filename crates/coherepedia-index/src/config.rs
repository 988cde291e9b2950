//! Index configuration.
//!
//! Loads and validates configuration from a YAML file. Every section has
//! defaults, so the smallest valid file names only the index directory and
//! the dimension.

use crate::error::IndexError;
use coherepedia_vector::VectorSimilarity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Index configuration.
///
/// Example YAML:
/// ```yaml
/// name: "coherepedia"
/// index_dir: "/var/lib/coherepedia"
/// dimension: 1024
/// similarity: cosine
/// graph:
///   max_degree: 48
///   search_width: 128
///   overflow: 1.2
///   alpha: 1.2
/// pq:
///   num_centroids: 256
/// search:
///   beam_width: 100
/// build_scoring: pq
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base name shared by every index file
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory holding the index files
    pub index_dir: PathBuf,

    /// Vector dimension
    pub dimension: usize,

    /// Similarity function for build and search
    #[serde(default = "default_similarity")]
    pub similarity: VectorSimilarity,

    /// Graph construction parameters
    #[serde(default)]
    pub graph: GraphConfig,

    /// Codec A training parameters
    #[serde(default)]
    pub pq: PqConfig,

    /// Query-time traversal parameters
    #[serde(default)]
    pub search: SearchOptions,

    /// Scorer used while building the graph
    #[serde(default)]
    pub build_scoring: BuildScoring,
}

/// Graph construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Degree bound R, enforced exactly after cleanup
    #[serde(default = "default_max_degree")]
    pub max_degree: usize,

    /// Construction beam width L
    #[serde(default = "default_search_width")]
    pub search_width: usize,

    /// Transient degree slack tolerated during insertion
    #[serde(default = "default_overflow")]
    pub overflow: f32,

    /// Diversity parameter for robust pruning
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_degree: default_max_degree(),
            search_width: default_search_width(),
            overflow: default_overflow(),
            alpha: default_alpha(),
        }
    }
}

impl GraphConfig {
    /// Degree cap during construction: `ceil(R * overflow)`.
    pub fn overflow_degree(&self) -> usize {
        ((self.max_degree as f32) * self.overflow).ceil() as usize
    }
}

/// Product quantization (Codec A) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqConfig {
    /// Number of subspaces M. `None` picks `dimension * 4 / 64`.
    #[serde(default)]
    pub num_subspaces: Option<usize>,

    /// Centroids per subspace K (at most 256, one byte per code).
    #[serde(default = "default_num_centroids")]
    pub num_centroids: usize,

    /// Number of k-means iterations for training.
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Maximum number of vectors used for training.
    #[serde(default = "default_training_sample_size")]
    pub training_sample_size: usize,

    /// Seed for sampling and centroid initialization.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for PqConfig {
    fn default() -> Self {
        Self {
            num_subspaces: None,
            num_centroids: default_num_centroids(),
            kmeans_iterations: default_kmeans_iterations(),
            training_sample_size: default_training_sample_size(),
            seed: default_seed(),
        }
    }
}

impl PqConfig {
    /// Resolve the subspace count for a given dimension.
    pub fn subspaces_for(&self, dimension: usize) -> usize {
        self.num_subspaces
            .unwrap_or_else(|| (dimension * 4 / 64).max(1))
    }
}

/// Query-time traversal parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Minimum frontier size during beam search
    #[serde(default = "default_beam_width")]
    pub beam_width: usize,

    /// Upper bound on expanded nodes per query (unbounded if unset)
    #[serde(default)]
    pub max_expansions: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            beam_width: default_beam_width(),
            max_expansions: None,
        }
    }
}

/// Scorer used for graph construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildScoring {
    /// Full-precision vectors held in memory for the whole build
    Exact,
    /// Codec A codes, the same scorer queries traverse with
    #[default]
    Pq,
}

fn default_name() -> String {
    "coherepedia".to_string()
}

fn default_similarity() -> VectorSimilarity {
    VectorSimilarity::Cosine
}

fn default_max_degree() -> usize {
    48
}

fn default_search_width() -> usize {
    128
}

fn default_overflow() -> f32 {
    1.2
}

fn default_alpha() -> f32 {
    1.2
}

fn default_num_centroids() -> usize {
    256
}

fn default_kmeans_iterations() -> usize {
    25
}

fn default_training_sample_size() -> usize {
    128_000
}

fn default_seed() -> u64 {
    42
}

fn default_beam_width() -> usize {
    100
}

impl IndexConfig {
    /// Configuration with defaults for everything but location and dimension.
    pub fn new(index_dir: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            name: default_name(),
            index_dir: index_dir.into(),
            dimension,
            similarity: default_similarity(),
            graph: GraphConfig::default(),
            pq: PqConfig::default(),
            search: SearchOptions::default(),
            build_scoring: BuildScoring::default(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: IndexConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name".to_string()));
        }

        if self.dimension == 0 {
            return Err(ConfigError::InvalidField(
                "dimension must be > 0".to_string(),
            ));
        }

        let subspaces = self.pq.subspaces_for(self.dimension);
        if subspaces == 0 || self.dimension % subspaces != 0 {
            return Err(ConfigError::InvalidField(format!(
                "dimension {} not divisible by pq.num_subspaces {}",
                self.dimension, subspaces
            )));
        }

        if self.pq.num_centroids == 0 || self.pq.num_centroids > 256 {
            return Err(ConfigError::InvalidField(format!(
                "pq.num_centroids must be in 1..=256, got {}",
                self.pq.num_centroids
            )));
        }

        if self.pq.training_sample_size == 0 {
            return Err(ConfigError::InvalidField(
                "pq.training_sample_size must be > 0".to_string(),
            ));
        }

        let graph = &self.graph;
        if graph.max_degree == 0 {
            return Err(ConfigError::InvalidField(
                "graph.max_degree must be > 0".to_string(),
            ));
        }

        if graph.search_width < graph.max_degree {
            return Err(ConfigError::InvalidField(format!(
                "graph.search_width {} must be >= graph.max_degree {}",
                graph.search_width, graph.max_degree
            )));
        }

        if !(graph.alpha >= 1.0) {
            return Err(ConfigError::InvalidField(
                "graph.alpha must be >= 1.0".to_string(),
            ));
        }

        if !(graph.overflow >= 1.0) {
            return Err(ConfigError::InvalidField(
                "graph.overflow must be >= 1.0".to_string(),
            ));
        }

        if self.search.beam_width == 0 {
            return Err(ConfigError::InvalidField(
                "search.beam_width must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// File locations for this index.
    pub fn paths(&self) -> IndexPaths {
        IndexPaths::new(&self.index_dir, &self.name)
    }
}

/// Locations of the files that make up one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    /// Graph with inline Codec B feature blocks
    pub ann: PathBuf,
    /// Cached Codec A codebook (build time only)
    pub pq: PathBuf,
    /// Codec A codebook plus per-node codes
    pub pqv: PathBuf,
    /// Cached Codec B parameters (build time only)
    pub lvq: PathBuf,
}

impl IndexPaths {
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            ann: dir.join(format!("{}.ann", name)),
            pq: dir.join(format!("{}.pq", name)),
            pqv: dir.join(format!("{}.pqv", name)),
            lvq: dir.join(format!("{}.lvq", name)),
        }
    }

    /// Fail unless the files a searcher needs are present.
    pub fn validate_index_exists(&self) -> Result<(), IndexError> {
        for path in [&self.ann, &self.pqv] {
            if !path.exists() {
                return Err(IndexError::MissingComponent(path.clone()));
            }
        }
        Ok(())
    }

    /// True if both cached quantizer files are present.
    pub fn has_cached_quantizers(&self) -> bool {
        self.pq.exists() && self.lvq.exists()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

//! Disk-resident approximate nearest neighbor search.
//!
//! This crate builds a Vamana-style proximity graph over fixed-dimension
//! embeddings and serves similarity queries against it from a
//! memory-mapped file.
//!
//! # Two codecs
//!
//! - **Codec A** ([`ProductQuantizer`]): a few bytes per vector, scored
//!   with per-query lookup tables. Drives graph traversal.
//! - **Codec B** ([`LvqQuantizer`]): one byte per component plus a
//!   per-vector bias and scale. Stored inline with each node and used to
//!   rerank the traversal's best candidates.
//!
//! # Files
//!
//! | File | Contents |
//! |------|----------|
//! | `{name}.ann` | header, Codec B parameters, one fixed-size record per node |
//! | `{name}.pqv` | Codec A codebook and the code of every node |
//! | `{name}.pq`, `{name}.lvq` | cached quantizers, only read by builds |
//!
//! # Building
//!
//! ```no_run
//! use coherepedia_index::{IndexBuild, IndexConfig, MemoryContentStore, MemoryDataset};
//!
//! let config = IndexConfig::new("/tmp/coherepedia", 8);
//! let rows: Vec<Vec<f32>> = (0..1000).map(|i| vec![i as f32; 8]).collect();
//! let dataset = MemoryDataset::from_vectors(rows, 4);
//! let store = MemoryContentStore::new();
//!
//! let summary = IndexBuild::new(config).run(&dataset, &store)?;
//! println!("{} nodes in {:?}", summary.nodes, summary.elapsed);
//! # Ok::<(), coherepedia_index::IndexError>(())
//! ```

mod beam;
pub mod builder;
pub mod collab;
pub mod compressed;
pub mod config;
pub mod disk;
pub mod error;
pub mod format;
pub mod graph;
pub mod index;
pub mod lvq;
pub mod pipeline;
pub mod pq;
pub mod scoring;
pub mod searcher;
pub mod writer;

pub use builder::{robust_prune, GraphIndexBuilder};
pub use collab::{ContentStore, Dataset, EmbeddingProvider, MemoryContentStore, MemoryDataset};
pub use compressed::{PqNodeScorer, PqVectors};
pub use config::{
    BuildScoring, ConfigError, GraphConfig, IndexConfig, IndexPaths, PqConfig, SearchOptions,
};
pub use disk::{FeatureScorer, OnDiskGraph};
pub use error::{IndexError, Result};
pub use graph::{ConcurrentGraph, VectorArena};
pub use index::SearchIndex;
pub use lvq::{LvqCode, LvqQuantizer, LvqScoreFunction};
pub use pipeline::{BuildSummary, IndexBuild};
pub use pq::{PqScoreFunction, ProductQuantizer};
pub use scoring::{BuildScoreProvider, ExactBuildScoreProvider, PqBuildScoreProvider, ScoreFunction};
pub use writer::GraphWriter;
pub use searcher::{
    overquery_multiplier, rerank_k, AcceptAll, GraphSearcher, NodeFilter, PredicateFilter,
    SearchResult,
};

pub use coherepedia_vector::{NodeId, NodeScore, VectorSimilarity};

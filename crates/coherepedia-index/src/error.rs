//! Error types for coherepedia-index operations.

use crate::config::ConfigError;
use coherepedia_vector::{NodeId, VectorError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building, persisting or searching an index.
///
/// Nothing in this crate retries. A failed build leaves no usable index
/// behind and must be rerun from scratch.
#[derive(Debug, Error)]
pub enum IndexError {
    /// I/O error from filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Dimension mismatch or invalid values on insert or query.
    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    /// Node counts or degree bounds disagree after a build.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Corrupt, truncated or version-mismatched persisted file.
    #[error("Invalid index format: {0}")]
    Format(String),

    /// CRC checksum mismatch indicating data corruption.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Quantizer training or coding failed.
    #[error("Quantization error: {0}")]
    Quantization(String),

    /// Node id is outside the pre-sized arena.
    #[error("Node {id} exceeds capacity {capacity}")]
    CapacityExceeded { id: NodeId, capacity: usize },

    /// Node id was already inserted.
    #[error("Node {0} already inserted")]
    DuplicateNode(NodeId),

    /// Refusing to overwrite an existing index.
    #[error("Index already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// A required index file is absent.
    #[error("Missing index component: {}", .0.display())]
    MissingComponent(PathBuf),

    /// Content store, dataset or embedding provider failure.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl IndexError {
    /// Shorthand for a dimension mismatch.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        IndexError::Vector(VectorError::DimensionMismatch { expected, actual })
    }
}

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

//! Vector similarity primitives for the coherepedia ANN engine.
//!
//! This crate provides the pieces every other crate in the workspace scores
//! vectors with:
//!
//! - **Similarity functions**: Euclidean, dot product and cosine, all
//!   normalized so that higher = more similar and scores are non-negative
//! - **NodeScore**: a (node id, score) pair with the deterministic result order
//! - **ExactIndex**: linear-scan search, the ground truth for recall checks
//!
//! # Architecture
//!
//! ```text
//! coherepedia-vector   similarity + ground truth      <-- This crate
//!        ↓
//! coherepedia-index    PQ / LVQ codecs, Vamana graph, on-disk index, searcher
//!        ↓
//! coherepedia-bench    build + concurrent search benchmark
//! ```
//!
//! # Example
//!
//! ```
//! use coherepedia_vector::{ExactIndex, VectorSimilarity};
//!
//! let index = ExactIndex::new(2, VectorSimilarity::Cosine);
//! index.insert(0, &[1.0, 0.0]).unwrap();
//! index.insert(1, &[0.0, 1.0]).unwrap();
//!
//! let results = index.search(&[0.9, 0.1], 1).unwrap();
//! assert_eq!(results[0].node, 0);
//! ```

mod exact;
mod score;
mod similarity;

pub use exact::ExactIndex;
pub use score::{NodeId, NodeScore};
pub use similarity::{cosine, dot_product, l2_normalize, squared_euclidean, VectorSimilarity};

/// Error type for vector operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),
}

/// Result type for vector operations.
pub type Result<T> = std::result::Result<T, VectorError>;

/// Check that `vector` has `expected` components and contains no NaN or Inf.
pub fn validate_vector(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(VectorError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }

    for (i, &v) in vector.iter().enumerate() {
        if v.is_nan() {
            return Err(VectorError::InvalidVector(format!("NaN at index {}", i)));
        }
        if v.is_infinite() {
            return Err(VectorError::InvalidVector(format!("Inf at index {}", i)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[1.0, 2.0], 2).is_ok());

        let err = validate_vector(&[1.0], 2).unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch { expected: 2, actual: 1 }
        ));

        assert!(matches!(
            validate_vector(&[f32::NAN, 0.0], 2),
            Err(VectorError::InvalidVector(_))
        ));
        assert!(matches!(
            validate_vector(&[0.0, f32::INFINITY], 2),
            Err(VectorError::InvalidVector(_))
        ));
    }
}

//! Exact (brute force) search.
//!
//! Linear scan over full-precision vectors. O(n · d) per query, so it is
//! only used as ground truth: recall measurements and tests compare the
//! graph searcher against it.

use crate::score::{NodeId, NodeScore};
use crate::similarity::VectorSimilarity;
use crate::{validate_vector, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Brute force index over node IDs.
///
/// Thread-safe via RwLock, so ground truth can be collected while a
/// concurrent build is inserting the same vectors.
pub struct ExactIndex {
    /// Vector storage: node -> vector
    vectors: RwLock<HashMap<NodeId, Vec<f32>>>,
    /// Vector dimensions
    dimensions: usize,
    /// Similarity function
    similarity: VectorSimilarity,
}

impl ExactIndex {
    /// Create a new exact index.
    pub fn new(dimensions: usize, similarity: VectorSimilarity) -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            dimensions,
            similarity,
        }
    }

    /// Insert (or replace) the vector for `node`.
    pub fn insert(&self, node: NodeId, vector: &[f32]) -> Result<()> {
        validate_vector(vector, self.dimensions)?;

        let mut vectors = self.vectors.write();
        vectors.insert(node, vector.to_vec());
        Ok(())
    }

    /// Return the `k` most similar nodes, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<NodeScore>> {
        validate_vector(query, self.dimensions)?;

        if k == 0 {
            return Ok(vec![]);
        }

        let vectors = self.vectors.read();
        let mut results: Vec<NodeScore> = vectors
            .iter()
            .map(|(&node, vec)| NodeScore::new(node, self.similarity.compare(query, vec)))
            .collect();

        results.sort();
        results.truncate(k);

        Ok(results)
    }

    /// Fraction of `truth` (the exact top-k) found in `candidates`.
    pub fn recall(truth: &[NodeScore], candidates: &[NodeScore]) -> f64 {
        if truth.is_empty() {
            return 1.0;
        }
        let hits = truth
            .iter()
            .filter(|t| candidates.iter().any(|c| c.node == t.node))
            .count();
        hits as f64 / truth.len() as f64
    }

    /// Get a vector by node ID.
    pub fn get(&self, node: NodeId) -> Option<Vec<f32>> {
        let vectors = self.vectors.read();
        vectors.get(&node).cloned()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Similarity function used for scoring.
    pub fn similarity(&self) -> VectorSimilarity {
        self.similarity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VectorError;

    fn create_test_index() -> ExactIndex {
        ExactIndex::new(3, VectorSimilarity::Euclidean)
    }

    #[test]
    fn test_insert_and_get() {
        let index = create_test_index();

        index.insert(0, &[1.0, 2.0, 3.0]).unwrap();
        index.insert(1, &[4.0, 5.0, 6.0]).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.get(0).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(index.get(7).is_none());
    }

    #[test]
    fn test_search_euclidean() {
        let index = create_test_index();

        index.insert(0, &[0.0, 0.0, 0.0]).unwrap();
        index.insert(1, &[1.0, 1.0, 1.0]).unwrap();
        index.insert(2, &[10.0, 10.0, 10.0]).unwrap();

        let results = index.search(&[0.0, 0.0, 0.0], 3).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].node, 0);
        assert!((results[0].score - 1.0).abs() < 0.001);
        assert_eq!(results[1].node, 1);
        assert_eq!(results[2].node, 2);
    }

    #[test]
    fn test_search_top_k_and_ties() {
        let index = create_test_index();

        // Nodes 3 and 5 are equidistant from the query
        index.insert(5, &[1.0, 0.0, 0.0]).unwrap();
        index.insert(3, &[-1.0, 0.0, 0.0]).unwrap();
        index.insert(8, &[4.0, 0.0, 0.0]).unwrap();

        let results = index.search(&[0.0, 0.0, 0.0], 2).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.node).collect();
        assert_eq!(ids, vec![3, 5]);
    }

    #[test]
    fn test_search_empty_and_k_zero() {
        let index = create_test_index();
        assert!(index.search(&[1.0, 2.0, 3.0], 5).unwrap().is_empty());

        index.insert(0, &[1.0, 2.0, 3.0]).unwrap();
        assert!(index.search(&[1.0, 2.0, 3.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = create_test_index();

        let result = index.insert(0, &[1.0, 2.0]);
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));

        let result = index.search(&[1.0, 2.0], 1);
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_recall() {
        let truth = vec![NodeScore::new(1, 0.9), NodeScore::new(2, 0.8)];
        let found = vec![NodeScore::new(2, 0.8), NodeScore::new(7, 0.7)];
        assert!((ExactIndex::recall(&truth, &found) - 0.5).abs() < 1e-9);
        assert!((ExactIndex::recall(&[], &found) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(ExactIndex::new(3, VectorSimilarity::Cosine));

        let mut handles = vec![];
        for i in 0..10u32 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                index.insert(i, &[i as f32 + 1.0, 1.0, 0.0]).unwrap();
            }));
        }
        for _ in 0..10 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                let _ = index.search(&[1.0, 0.0, 0.0], 5);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len(), 10);
    }
}

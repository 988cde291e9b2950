//! Scoring capabilities used during graph construction.
//!
//! The builder never touches vectors directly. It asks a
//! [`BuildScoreProvider`] for a per-query scorer to drive traversal, and
//! for node-to-node similarities to drive robust pruning.

use crate::compressed::PqVectors;
use crate::error::Result;
use crate::graph::VectorArena;
use coherepedia_vector::{NodeId, VectorSimilarity};
use std::sync::Arc;

/// Scores nodes against one fixed query. Higher is more similar.
pub trait ScoreFunction {
    fn score(&self, node: NodeId) -> f32;
}

/// Source of similarities for graph construction.
///
/// Implementations must be safe to call from many insertion threads at
/// once; `insert` is called exactly once per node id, before any scorer can
/// reach that node.
pub trait BuildScoreProvider: Send + Sync {
    /// Vector dimension this provider accepts.
    fn dimension(&self) -> usize;

    /// Record the vector for `node`.
    fn insert(&self, node: NodeId, vector: &[f32]) -> Result<()>;

    /// Scorer for traversing the graph towards `query`.
    fn search_scorer<'a>(&'a self, query: &'a [f32]) -> Result<Box<dyn ScoreFunction + 'a>>;

    /// Similarity between two inserted nodes, 0.0 if either is unknown.
    fn node_similarity(&self, a: NodeId, b: NodeId) -> f32;
}

/// Full-precision scoring. Holds every vector in memory for the build.
pub struct ExactBuildScoreProvider {
    vectors: VectorArena,
    similarity: VectorSimilarity,
}

impl ExactBuildScoreProvider {
    pub fn new(capacity: usize, dimension: usize, similarity: VectorSimilarity) -> Self {
        Self {
            vectors: VectorArena::new(capacity, dimension),
            similarity,
        }
    }
}

struct ExactScorer<'a> {
    vectors: &'a VectorArena,
    query: &'a [f32],
    similarity: VectorSimilarity,
}

impl ScoreFunction for ExactScorer<'_> {
    fn score(&self, node: NodeId) -> f32 {
        self.vectors
            .get(node)
            .map(|v| self.similarity.compare(self.query, v))
            .unwrap_or(0.0)
    }
}

impl BuildScoreProvider for ExactBuildScoreProvider {
    fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    fn insert(&self, node: NodeId, vector: &[f32]) -> Result<()> {
        self.vectors.set(node, vector)
    }

    fn search_scorer<'a>(&'a self, query: &'a [f32]) -> Result<Box<dyn ScoreFunction + 'a>> {
        Ok(Box::new(ExactScorer {
            vectors: &self.vectors,
            query,
            similarity: self.similarity,
        }))
    }

    fn node_similarity(&self, a: NodeId, b: NodeId) -> f32 {
        match (self.vectors.get(a), self.vectors.get(b)) {
            (Some(x), Some(y)) => self.similarity.compare(x, y),
            _ => 0.0,
        }
    }
}

/// Codec A scoring over the shared compressed vectors.
///
/// Traversal uses the query's lookup tables; pruning compares two codes
/// centroid against centroid.
pub struct PqBuildScoreProvider {
    vectors: Arc<PqVectors>,
    similarity: VectorSimilarity,
}

impl PqBuildScoreProvider {
    pub fn new(vectors: Arc<PqVectors>, similarity: VectorSimilarity) -> Self {
        Self {
            vectors,
            similarity,
        }
    }
}

impl BuildScoreProvider for PqBuildScoreProvider {
    fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    fn insert(&self, node: NodeId, vector: &[f32]) -> Result<()> {
        self.vectors.encode_and_set(node, vector)
    }

    fn search_scorer<'a>(&'a self, query: &'a [f32]) -> Result<Box<dyn ScoreFunction + 'a>> {
        Ok(Box::new(
            self.vectors.score_function_for(query, self.similarity)?,
        ))
    }

    fn node_similarity(&self, a: NodeId, b: NodeId) -> f32 {
        match (self.vectors.code(a), self.vectors.code(b)) {
            (Some(x), Some(y)) => self.vectors.pq().code_similarity(self.similarity, x, y),
            _ => 0.0,
        }
    }
}

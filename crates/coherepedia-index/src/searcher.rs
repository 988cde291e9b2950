//! Two-phase graph search.
//!
//! Phase one walks the graph with Codec A scores to collect candidates.
//! Phase two rescores the best of them with the Codec B feature blocks
//! stored inline in the graph file, which are much closer to the true
//! similarity.

use crate::beam::beam_search;
use crate::compressed::PqVectors;
use crate::config::SearchOptions;
use crate::disk::OnDiskGraph;
use crate::error::Result;
use crate::scoring::ScoreFunction;
use coherepedia_vector::{validate_vector, NodeId, NodeScore, VectorSimilarity};
use std::collections::HashSet;

/// Restricts which nodes may appear in results.
///
/// Filtered nodes are still traversed; they are only dropped before rerank.
pub trait NodeFilter: Sync {
    fn accepts(&self, node: NodeId) -> bool;
}

/// Accepts every node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl NodeFilter for AcceptAll {
    fn accepts(&self, _node: NodeId) -> bool {
        true
    }
}

impl NodeFilter for HashSet<NodeId> {
    fn accepts(&self, node: NodeId) -> bool {
        self.contains(&node)
    }
}

/// Adapts a closure into a [`NodeFilter`].
pub struct PredicateFilter<F>(pub F);

impl<F> NodeFilter for PredicateFilter<F>
where
    F: Fn(NodeId) -> bool + Sync,
{
    fn accepts(&self, node: NodeId) -> bool {
        (self.0)(node)
    }
}

/// Results of one search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    /// Best first, at most `top_k` entries
    pub results: Vec<NodeScore>,
    /// Number of candidates rescored with Codec B
    pub reranked_count: usize,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}

/// Over-query multiplier for a result count: `max(1, 0.979 + 4.021 * k^-0.761)`.
pub fn overquery_multiplier(top_k: usize) -> f64 {
    if top_k == 0 {
        return 1.0;
    }
    (0.979 + 4.021 * (top_k as f64).powf(-0.761)).max(1.0)
}

/// Number of candidates to rescore for `top_k` results.
///
/// About 5x for a single result, 1.1x at 100 and exactly `top_k` from
/// roughly 1000 on.
pub fn rerank_k(top_k: usize) -> usize {
    (top_k as f64 * overquery_multiplier(top_k)).round() as usize
}

/// Searches one on-disk graph with its compressed vectors.
pub struct GraphSearcher<'a> {
    graph: &'a OnDiskGraph,
    vectors: &'a PqVectors,
    options: SearchOptions,
}

impl<'a> GraphSearcher<'a> {
    pub fn new(graph: &'a OnDiskGraph, vectors: &'a PqVectors) -> Self {
        Self {
            graph,
            vectors,
            options: SearchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    /// Find the `top_k` nodes most similar to `query`.
    ///
    /// Up to `rerank_k` filtered candidates are rescored before the final
    /// cut.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        rerank_k: usize,
        similarity: VectorSimilarity,
        filter: &dyn NodeFilter,
    ) -> Result<SearchResult> {
        validate_vector(query, self.graph.dimension())?;

        let entry = match self.graph.entry_node() {
            Some(entry) if top_k > 0 => entry,
            _ => return Ok(SearchResult::default()),
        };

        let approx = self.vectors.score_function_for(query, similarity)?;
        let width = rerank_k.max(self.options.beam_width).max(top_k);
        let candidates = beam_search(
            entry,
            width,
            self.options.max_expansions,
            |n| approx.score(n),
            |n, out| {
                out.clear();
                out.extend(self.graph.neighbors(n));
            },
        );

        let exact = self.graph.rerank_scorer(query, similarity)?;
        let mut results: Vec<NodeScore> = candidates
            .into_iter()
            .filter(|c| filter.accepts(c.node))
            .take(rerank_k.max(top_k))
            .map(|c| NodeScore::new(c.node, exact.score(c.node)))
            .collect();
        let reranked_count = results.len();

        results.sort();
        results.truncate(top_k);

        Ok(SearchResult {
            results,
            reranked_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rerank_k_reference_values() {
        assert_eq!(rerank_k(0), 0);
        assert_eq!(rerank_k(1), 5);
        assert_eq!(rerank_k(10), 17);
        assert_eq!(rerank_k(100), 110);
        assert_eq!(rerank_k(1000), 1000);
        assert_eq!(rerank_k(5000), 5000);
    }

    #[test]
    fn test_multiplier_non_increasing() {
        let mut previous = f64::INFINITY;
        for k in 1..2000 {
            let m = overquery_multiplier(k);
            assert!(m <= previous);
            assert!(m >= 1.0);
            previous = m;
        }
    }

    #[test]
    fn test_filters() {
        assert!(AcceptAll.accepts(3));

        let set: HashSet<NodeId> = [1, 2].into_iter().collect();
        assert!(set.accepts(1));
        assert!(!set.accepts(3));

        let even = PredicateFilter(|n: NodeId| n % 2 == 0);
        assert!(even.accepts(4));
        assert!(!even.accepts(5));
    }
}

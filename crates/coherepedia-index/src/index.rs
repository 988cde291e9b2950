//! Serving facade over a finished index.

use crate::collab::EmbeddingProvider;
use crate::compressed::PqVectors;
use crate::config::{IndexPaths, SearchOptions};
use crate::disk::OnDiskGraph;
use crate::error::{IndexError, Result};
use crate::searcher::{rerank_k, AcceptAll, GraphSearcher, NodeFilter, SearchResult};
use coherepedia_observe::{obs_hist, obs_timed, IndexEvent, Meter, NoopMeter, SearchEvt, SearchKind};
use coherepedia_vector::VectorSimilarity;
use std::sync::Arc;

/// A loaded index ready for concurrent queries.
///
/// # Example
///
/// ```no_run
/// use coherepedia_index::{IndexPaths, SearchIndex, SearchOptions};
///
/// let paths = IndexPaths::new("/var/lib/coherepedia", "coherepedia");
/// let index = SearchIndex::open(&paths, SearchOptions::default())?;
/// let hits = index.search(&vec![0.0; index.dimension()], 10)?;
/// for hit in &hits.results {
///     println!("{} {:.4}", hit.node, hit.score);
/// }
/// # Ok::<(), coherepedia_index::IndexError>(())
/// ```
pub struct SearchIndex {
    graph: OnDiskGraph,
    vectors: PqVectors,
    options: SearchOptions,
    meter: Arc<dyn Meter>,
}

impl SearchIndex {
    /// Open the graph and compressed-vector files of one index.
    pub fn open(paths: &IndexPaths, options: SearchOptions) -> Result<Self> {
        paths.validate_index_exists()?;
        let graph = OnDiskGraph::open(&paths.ann)?;
        let vectors = PqVectors::load(&paths.pqv)?;

        if vectors.dimension() != graph.dimension() {
            return Err(IndexError::Format(format!(
                "compressed vectors have dimension {}, graph has {}",
                vectors.dimension(),
                graph.dimension()
            )));
        }
        if vectors.len() != graph.size() {
            return Err(IndexError::Integrity(format!(
                "{} compressed vectors for {} graph nodes",
                vectors.len(),
                graph.size()
            )));
        }

        tracing::info!(
            path = %paths.ann.display(),
            nodes = graph.size(),
            dimension = graph.dimension(),
            similarity = ?graph.similarity(),
            "index opened"
        );

        Ok(Self {
            graph,
            vectors,
            options,
            meter: Arc::new(NoopMeter),
        })
    }

    pub fn with_meter(self, meter: Arc<dyn Meter>) -> Self {
        meter.emit(IndexEvent::Search(SearchEvt {
            kind: SearchKind::Opened {
                nodes: self.graph.size() as u64,
                dimension: self.graph.dimension() as u32,
            },
        }));
        Self { meter, ..self }
    }

    /// The `top_k` most similar nodes, rescoring `rerank_k(top_k)` candidates.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<SearchResult> {
        self.search_filtered(query, top_k, &AcceptAll)
    }

    /// Like [`SearchIndex::search`], restricted to nodes `filter` accepts.
    pub fn search_filtered(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &dyn NodeFilter,
    ) -> Result<SearchResult> {
        let searcher =
            GraphSearcher::new(&self.graph, &self.vectors).with_options(self.options.clone());

        let result = obs_timed!(self.meter, "ann_search_duration_ms", &[], {
            searcher.search(query, top_k, rerank_k(top_k), self.similarity(), filter)
        })?;

        obs_hist!(self.meter, "ann_reranked", &[], result.reranked_count);
        if result.is_empty() && top_k > 0 {
            self.meter.emit(IndexEvent::Search(SearchEvt {
                kind: SearchKind::EmptyResult,
            }));
        }
        Ok(result)
    }

    /// Embed `text` with `provider`, then search.
    pub fn search_text(
        &self,
        provider: &dyn EmbeddingProvider,
        text: &str,
        top_k: usize,
    ) -> Result<SearchResult> {
        let query = provider.embed(text)?;
        if query.len() != self.dimension() {
            return Err(IndexError::dimension_mismatch(self.dimension(), query.len()));
        }
        self.search(&query, top_k)
    }

    pub fn graph(&self) -> &OnDiskGraph {
        &self.graph
    }

    pub fn vectors(&self) -> &PqVectors {
        &self.vectors
    }

    /// Similarity recorded in the graph file at build time.
    pub fn similarity(&self) -> VectorSimilarity {
        self.graph.similarity()
    }

    pub fn dimension(&self) -> usize {
        self.graph.dimension()
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.graph.size()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

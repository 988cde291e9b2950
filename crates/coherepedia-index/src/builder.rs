//! Concurrent Vamana graph builder.
//!
//! Nodes are inserted one at a time, from any number of threads, each with
//! a distinct id:
//!
//! 1. The first node becomes the entry point.
//! 2. Every later node runs a beam search from the entry point using the
//!    provider's approximate scorer.
//! 3. The visited candidates are reduced with robust pruning, and the
//!    survivors become the new node's neighbors.
//! 4. Each neighbor gets a reverse edge back, re-pruned under its own lock
//!    if that pushes it past the construction cap.
//!
//! During insertion lists may grow to `ceil(R * overflow)`. [`GraphIndexBuilder::cleanup`]
//! brings every list down to `R` once all insertions are done.

use crate::beam::beam_search;
use crate::config::GraphConfig;
use crate::error::{IndexError, Result};
use crate::graph::ConcurrentGraph;
use crate::scoring::BuildScoreProvider;
use coherepedia_observe::{obs_count, obs_hist, BuildEvt, BuildKind, IndexEvent, Meter, NoopMeter};
use coherepedia_vector::{validate_vector, NodeId, NodeScore};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Select a diverse neighbor set for `node` from scored candidates.
///
/// `candidates` carry their similarity to `node`. They are visited best
/// first (exact score ties by ascending id), and a candidate `c` is
/// rejected if an already accepted `p` has
/// `similarity(c, p) * alpha >= score(c)`. Equality counts as dominated.
/// Duplicates and `node` itself are skipped. At most `max_degree` ids are
/// returned, in acceptance order.
pub fn robust_prune(
    node: NodeId,
    candidates: &[NodeScore],
    alpha: f32,
    max_degree: usize,
    similarity: impl Fn(NodeId, NodeId) -> f32,
) -> Vec<NodeId> {
    let mut ordered: Vec<NodeScore> = candidates
        .iter()
        .copied()
        .filter(|c| c.node != node)
        .collect();
    ordered.sort();

    let mut seen = HashSet::with_capacity(ordered.len());
    let mut accepted: Vec<NodeId> = Vec::with_capacity(max_degree);

    for candidate in ordered {
        if accepted.len() >= max_degree {
            break;
        }
        if !seen.insert(candidate.node) {
            continue;
        }

        let dominated = accepted
            .iter()
            .any(|&p| similarity(candidate.node, p) * alpha >= candidate.score);
        if !dominated {
            accepted.push(candidate.node);
        }
    }

    accepted
}

/// Builds a bounded-degree proximity graph from concurrent insertions.
pub struct GraphIndexBuilder {
    dimension: usize,
    config: GraphConfig,
    graph: ConcurrentGraph,
    scores: Box<dyn BuildScoreProvider>,
    meter: Arc<dyn Meter>,
    name: String,
}

impl GraphIndexBuilder {
    /// Create a builder for ids `0..capacity`.
    pub fn new(
        dimension: usize,
        config: GraphConfig,
        capacity: usize,
        scores: Box<dyn BuildScoreProvider>,
    ) -> Self {
        Self {
            dimension,
            graph: ConcurrentGraph::new(capacity, config.max_degree),
            config,
            scores,
            meter: Arc::new(NoopMeter),
            name: String::new(),
        }
    }

    /// Report metrics and events to `meter`, labelled with the index name.
    pub fn with_meter(mut self, meter: Arc<dyn Meter>, name: impl Into<String>) -> Self {
        self.meter = meter;
        self.name = name.into();
        self
    }

    /// Insert `vector` under `id`.
    ///
    /// Safe to call concurrently for distinct ids.
    pub fn add_node(&self, id: NodeId, vector: &[f32]) -> Result<()> {
        validate_vector(vector, self.dimension)?;
        self.graph.claim(id)?;
        self.scores.insert(id, vector)?;

        if self.graph.try_set_entry(id) {
            obs_count!(self.meter, "ann_nodes_inserted", &[], 1);
            return Ok(());
        }
        let entry = self
            .graph
            .entry_node()
            .ok_or_else(|| IndexError::Integrity("graph has no entry point".to_string()))?;

        let scorer = self.scores.search_scorer(vector)?;
        let candidates = beam_search(
            entry,
            self.config.search_width,
            None,
            |n| scorer.score(n),
            |n, out| self.graph.neighbors_into(n, out),
        );

        let cap = self.config.overflow_degree();
        let alpha = self.config.alpha;
        let neighbors = robust_prune(id, &candidates, alpha, cap, |a, b| {
            self.scores.node_similarity(a, b)
        });
        self.graph.set_neighbors(id, neighbors.clone())?;

        for &neighbor in &neighbors {
            self.graph.update_neighbors(neighbor, |list| {
                if list.contains(&id) {
                    return;
                }
                list.push(id);
                if list.len() > cap {
                    *list = self.reprune(neighbor, list, cap);
                }
            })?;
        }

        obs_count!(self.meter, "ann_nodes_inserted", &[], 1);
        Ok(())
    }

    /// Bring every neighbor list down to the degree bound.
    ///
    /// Taking `&mut self` guarantees no insertion is still running.
    pub fn cleanup(&mut self) -> Result<()> {
        let started = Instant::now();
        let max_degree = self.config.max_degree;

        let oversized: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|&id| self.graph.neighbors(id).len() > max_degree)
            .collect();

        let this = &*self;
        oversized.par_iter().try_for_each(|&id| {
            this.graph.update_neighbors(id, |list| {
                *list = this.reprune(id, list, max_degree);
            })
        })?;

        let ms = started.elapsed().as_millis() as u32;
        obs_hist!(self.meter, "ann_cleanup_duration_ms", &[], ms);
        self.meter.emit(IndexEvent::Build(BuildEvt {
            index: self.name.clone(),
            kind: BuildKind::Cleanup {
                nodes: oversized.len() as u64,
                ms,
            },
        }));
        tracing::debug!(pruned = oversized.len(), ms, "neighbor lists trimmed to degree bound");
        Ok(())
    }

    /// Re-run robust pruning over an existing neighbor list.
    fn reprune(&self, node: NodeId, list: &[NodeId], max_degree: usize) -> Vec<NodeId> {
        let scored: Vec<NodeScore> = list
            .iter()
            .map(|&n| NodeScore::new(n, self.scores.node_similarity(node, n)))
            .collect();
        robust_prune(node, &scored, self.config.alpha, max_degree, |a, b| {
            self.scores.node_similarity(a, b)
        })
    }

    pub fn graph(&self) -> &ConcurrentGraph {
        &self.graph
    }

    /// Number of inserted nodes.
    pub fn size(&self) -> usize {
        self.graph.size()
    }

    pub fn entry_node(&self) -> Option<NodeId> {
        self.graph.entry_node()
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
}

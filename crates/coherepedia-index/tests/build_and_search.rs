//! Integration tests for the full index lifecycle.
//!
//! These tests verify that:
//! 1. A build over a sharded dataset produces a navigable graph
//! 2. Concurrent insertion yields exactly the inserted nodes, within bounds
//! 3. Adjacency and feature blocks survive the trip through the graph file
//! 4. The served index honors result ordering, filters and edge cases
//! 5. Approximate results agree with exact search

use coherepedia_index::{
    BuildScoring, ConcurrentGraph, ContentStore, EmbeddingProvider, ExactBuildScoreProvider,
    GraphConfig, GraphIndexBuilder, GraphWriter, IndexBuild, IndexConfig, IndexError,
    LvqQuantizer, MemoryContentStore, MemoryDataset, NodeId, OnDiskGraph, PqConfig, PqVectors,
    PredicateFilter, ProductQuantizer, SearchIndex, SearchOptions, VectorSimilarity,
};
use coherepedia_vector::{l2_normalize, ExactIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tempfile::TempDir;

fn random_unit_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            l2_normalize(&mut v);
            v
        })
        .collect()
}

// alpha 1.0 keeps every candidate that is closer to the node than to an
// accepted neighbor, which these small graphs need to stay fully navigable.
fn small_index_config(dir: &TempDir, dim: usize) -> IndexConfig {
    let mut config = IndexConfig::new(dir.path(), dim);
    config.graph = GraphConfig {
        max_degree: 8,
        search_width: 64,
        overflow: 1.2,
        alpha: 1.0,
    };
    config.pq = PqConfig {
        num_subspaces: Some(4),
        num_centroids: 256,
        kmeans_iterations: 10,
        training_sample_size: 1000,
        seed: 42,
    };
    config.search = SearchOptions {
        beam_width: 200,
        max_expansions: None,
    };
    config
}

fn assert_graph_invariants(graph: &ConcurrentGraph, n: usize, bound: usize) {
    assert_eq!(graph.size(), n);
    for id in 0..n as NodeId {
        let list = graph.neighbors(id);
        assert!(list.len() <= bound, "node {} has degree {}", id, list.len());
        assert!(!list.contains(&id), "node {} has a self-edge", id);
        let unique: HashSet<_> = list.iter().collect();
        assert_eq!(unique.len(), list.len(), "node {} has duplicate edges", id);
        assert!(list.iter().all(|&n2| (n2 as usize) < n));
    }
}

/// Nodes whose own vector does not come back as the top hit.
fn self_misses(index: &SearchIndex, vectors: &[Vec<f32>]) -> Vec<usize> {
    vectors
        .iter()
        .enumerate()
        .filter(|(id, v)| {
            let result = index.search(v, 1).unwrap();
            result.results.first().map(|r| r.node as usize) != Some(*id)
        })
        .map(|(id, _)| id)
        .collect()
}

// Records are the row position, so map node ids back through the store.
fn row_of(store: &MemoryContentStore, id: NodeId) -> usize {
    let record = store.get(id).unwrap().unwrap();
    u64::from_le_bytes(record.try_into().unwrap()) as usize
}

#[test]
fn test_end_to_end_self_query() {
    let dir = TempDir::new().unwrap();
    let mut config = small_index_config(&dir, 8);
    config.build_scoring = BuildScoring::Exact;

    let vectors = random_unit_vectors(1000, 8, 7);
    let dataset = MemoryDataset::from_vectors(vectors.clone(), 4);
    let store = MemoryContentStore::new();

    let summary = IndexBuild::new(config.clone()).run(&dataset, &store).unwrap();
    assert_eq!(summary.nodes, 1000);
    assert_eq!(store.len(), 1000);

    let index = SearchIndex::open(&config.paths(), config.search.clone()).unwrap();
    assert_eq!(index.len(), 1000);
    assert_eq!(index.similarity(), VectorSimilarity::Cosine);

    // Node ids are assigned by arrival, so reorder the vectors by node id.
    let mut by_node = vec![Vec::new(); 1000];
    for id in 0..1000 {
        by_node[id as usize] = vectors[row_of(&store, id)].clone();
    }

    let misses = self_misses(&index, &by_node);
    assert!(misses.is_empty(), "nodes not found by their own vector: {:?}", misses);

    for d in 0..1000 {
        let list: Vec<_> = index.graph().neighbors(d).collect();
        assert!(list.len() <= 8);
        assert!(!list.contains(&d));
    }
}

#[test]
fn test_pq_build_scoring_is_navigable() {
    let dir = TempDir::new().unwrap();
    let config = small_index_config(&dir, 8);
    assert_eq!(config.build_scoring, BuildScoring::Pq);

    let vectors = random_unit_vectors(600, 8, 11);
    let dataset = MemoryDataset::from_vectors(vectors.clone(), 3);
    let store = MemoryContentStore::new();
    IndexBuild::new(config.clone()).run(&dataset, &store).unwrap();

    let index = SearchIndex::open(&config.paths(), config.search.clone()).unwrap();
    let mut by_node = vec![Vec::new(); 600];
    for id in 0..600 {
        by_node[id as usize] = vectors[row_of(&store, id)].clone();
    }

    let misses = self_misses(&index, &by_node);
    assert!(misses.len() <= 60, "{} of 600 nodes missed", misses.len());
}

#[test]
fn test_default_alpha_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut config = small_index_config(&dir, 8);
    config.graph.alpha = GraphConfig::default().alpha;
    assert_eq!(config.build_scoring, BuildScoring::Pq);
    assert_eq!(config.similarity, VectorSimilarity::Cosine);

    let vectors = random_unit_vectors(1000, 8, 7);
    let dataset = MemoryDataset::from_vectors(vectors.clone(), 4);
    let store = MemoryContentStore::new();
    IndexBuild::new(config.clone()).run(&dataset, &store).unwrap();

    let index = SearchIndex::open(&config.paths(), config.search.clone()).unwrap();
    let mut by_node = vec![Vec::new(); 1000];
    let mut edges = 0;
    for id in 0..1000 {
        by_node[id as usize] = vectors[row_of(&store, id)].clone();
        let degree = index.graph().neighbors(id).count();
        assert!((1..=8).contains(&degree), "node {} has degree {}", id, degree);
        edges += degree;
    }

    // alpha > 1 also rejects candidates slightly closer to the node than to
    // an accepted neighbor, so lists stay well under the bound.
    let avg_degree = edges as f64 / 1000.0;
    assert!(avg_degree < 7.0, "average degree {:.2}", avg_degree);

    let misses = self_misses(&index, &by_node);
    assert!(misses.len() <= 150, "{} of 1000 nodes missed", misses.len());
}

#[test]
fn test_recall_against_exact_search() {
    let dir = TempDir::new().unwrap();
    let mut config = small_index_config(&dir, 8);
    config.build_scoring = BuildScoring::Exact;

    let vectors = random_unit_vectors(1000, 8, 31);
    let dataset = MemoryDataset::from_vectors(vectors.clone(), 4);
    let store = MemoryContentStore::new();
    IndexBuild::new(config.clone()).run(&dataset, &store).unwrap();
    let index = SearchIndex::open(&config.paths(), config.search.clone()).unwrap();

    let exact = ExactIndex::new(8, config.similarity);
    for id in 0..1000 {
        exact.insert(id, &vectors[row_of(&store, id)]).unwrap();
    }

    let queries = random_unit_vectors(50, 8, 32);
    let total: f64 = queries
        .iter()
        .map(|q| {
            let truth = exact.search(q, 10).unwrap();
            let found = index.search(q, 10).unwrap();
            ExactIndex::recall(&truth, &found.results)
        })
        .sum();
    let recall = total / queries.len() as f64;
    assert!(recall >= 0.85, "recall@10 {:.3}", recall);
}

#[test]
fn test_concurrent_insertion_four_workers() {
    let n = 2000;
    let dim = 16;
    let vectors = random_unit_vectors(n, dim, 3);
    let config = GraphConfig {
        max_degree: 12,
        search_width: 48,
        overflow: 1.2,
        alpha: 1.2,
    };
    let scores = ExactBuildScoreProvider::new(n, dim, VectorSimilarity::Cosine);
    let mut builder = GraphIndexBuilder::new(dim, config.clone(), n, Box::new(scores));

    let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
    pool.install(|| {
        use rayon::prelude::*;
        (0..4usize).into_par_iter().for_each(|worker| {
            for id in (worker..n).step_by(4) {
                builder.add_node(id as NodeId, &vectors[id]).unwrap();
            }
        });
    });

    assert_graph_invariants(builder.graph(), n, config.overflow_degree());
    builder.cleanup().unwrap();
    assert_graph_invariants(builder.graph(), n, 12);
    assert!(builder.entry_node().is_some());
}

#[test]
fn test_persist_and_reload_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roundtrip.ann");
    let n = 300;
    let dim = 12;
    let vectors = random_unit_vectors(n, dim, 5);

    let lvq = LvqQuantizer::train(&vectors).unwrap();
    let config = GraphConfig {
        max_degree: 6,
        search_width: 32,
        overflow: 1.5,
        alpha: 1.2,
    };
    let scores = ExactBuildScoreProvider::new(n, dim, VectorSimilarity::Euclidean);
    let mut builder = GraphIndexBuilder::new(dim, config, n, Box::new(scores));
    let mut writer =
        GraphWriter::create(&path, dim, 6, VectorSimilarity::Euclidean, &lvq).unwrap();

    let mut features = Vec::with_capacity(n);
    for (id, v) in vectors.iter().enumerate() {
        let feature = lvq.encode(v).unwrap().to_bytes();
        writer.write_inline(id as NodeId, &feature).unwrap();
        builder.add_node(id as NodeId, v).unwrap();
        features.push(feature);
    }
    builder.cleanup().unwrap();
    writer.write_adjacency(builder.graph()).unwrap();
    writer.close().unwrap();

    let graph = OnDiskGraph::open(&path).unwrap();
    assert_eq!(graph.size(), n);
    assert_eq!(graph.entry_node(), builder.entry_node());
    assert_eq!(graph.similarity(), VectorSimilarity::Euclidean);
    assert_eq!(graph.lvq().mean(), lvq.mean());
    for id in 0..n as NodeId {
        let on_disk: Vec<NodeId> = graph.neighbors(id).collect();
        assert_eq!(on_disk, builder.graph().neighbors(id), "node {}", id);
        assert_eq!(graph.feature(id).unwrap(), &features[id as usize][..]);
    }
}

#[test]
fn test_lvq_more_accurate_than_pq() {
    let dim = 64;
    let mut rng = StdRng::seed_from_u64(99);
    let vectors: Vec<Vec<f32>> = (0..2000)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();

    let pq = ProductQuantizer::train(
        &vectors,
        dim,
        &PqConfig {
            num_subspaces: Some(16),
            num_centroids: 256,
            kmeans_iterations: 10,
            training_sample_size: 2000,
            seed: 1,
        },
    )
    .unwrap();
    let lvq = LvqQuantizer::train(&vectors).unwrap();

    let squared_error = |a: &[f32], b: &[f32]| -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| ((x - y) * (x - y)) as f64)
            .sum()
    };

    for (i, v) in vectors.iter().enumerate() {
        let pq_error = squared_error(v, &pq.decode(&pq.encode(v).unwrap()).unwrap());
        let lvq_error = squared_error(v, &lvq.decode(&lvq.encode(v).unwrap()).unwrap());
        assert!(
            lvq_error <= pq_error,
            "vector {}: lvq error {} exceeds pq error {}",
            i,
            lvq_error,
            pq_error
        );
    }
}

struct FixedEmbedding(Vec<f32>);

impl EmbeddingProvider for FixedEmbedding {
    fn embed(&self, _text: &str) -> coherepedia_index::Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

#[test]
fn test_search_contract() {
    let dir = TempDir::new().unwrap();
    let mut config = small_index_config(&dir, 8);
    config.build_scoring = BuildScoring::Exact;

    let vectors = random_unit_vectors(400, 8, 21);
    let dataset = MemoryDataset::from_vectors(vectors.clone(), 2);
    IndexBuild::new(config.clone())
        .run(&dataset, &MemoryContentStore::new())
        .unwrap();
    let index = SearchIndex::open(&config.paths(), config.search.clone()).unwrap();

    let query = &vectors[17];

    // Ordered best first, ties by ascending id, never more than top_k.
    let result = index.search(query, 10).unwrap();
    assert_eq!(result.len(), 10);
    assert!(result.reranked_count >= 10);
    for w in result.results.windows(2) {
        assert!(
            w[0].score > w[1].score || (w[0].score == w[1].score && w[0].node < w[1].node)
        );
    }

    // top_k == 0
    assert!(index.search(query, 0).unwrap().is_empty());

    // Filters only drop nodes, never add them.
    let even = PredicateFilter(|n: NodeId| n % 2 == 0);
    let filtered = index.search_filtered(query, 10, &even).unwrap();
    assert!(filtered.results.iter().all(|r| r.node % 2 == 0));

    let nothing: HashSet<NodeId> = HashSet::new();
    let empty = index.search_filtered(query, 10, &nothing).unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.reranked_count, 0);

    // Dimension checks happen before traversal.
    assert!(matches!(
        index.search(&[1.0, 0.0], 5),
        Err(IndexError::Vector(_))
    ));
    let wrong = FixedEmbedding(vec![0.5; 3]);
    assert!(matches!(
        index.search_text(&wrong, "anything", 5),
        Err(IndexError::Vector(_))
    ));

    let right = FixedEmbedding(query.clone());
    let by_text = index.search_text(&right, "anything", 10).unwrap();
    assert_eq!(by_text, result);
}

#[test]
fn test_empty_index_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let config = small_index_config(&dir, 8);
    let paths = config.paths();

    let sample = random_unit_vectors(50, 8, 2);
    let pq = ProductQuantizer::train(&sample, 8, &config.pq).unwrap();
    let lvq = LvqQuantizer::train(&sample).unwrap();

    let mut writer =
        GraphWriter::create(&paths.ann, 8, 8, VectorSimilarity::DotProduct, &lvq).unwrap();
    writer.write_adjacency(&ConcurrentGraph::new(0, 8)).unwrap();
    writer.close().unwrap();
    PqVectors::with_capacity(pq, 0).save(&paths.pqv).unwrap();

    let index = SearchIndex::open(&paths, SearchOptions::default()).unwrap();
    assert!(index.is_empty());
    assert!(index.search(&sample[0], 5).unwrap().is_empty());
}

#[test]
fn test_open_missing_index() {
    let dir = TempDir::new().unwrap();
    let config = small_index_config(&dir, 8);

    assert!(matches!(
        SearchIndex::open(&config.paths(), SearchOptions::default()),
        Err(IndexError::MissingComponent(_))
    ));
}

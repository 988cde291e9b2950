use coherepedia_index::{
    BuildScoring, IndexBuild, IndexConfig, LvqQuantizer, MemoryContentStore, MemoryDataset,
    PqConfig, ProductQuantizer, SearchIndex, SearchOptions, VectorSimilarity,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

fn codec_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_scoring");
    group.throughput(Throughput::Elements(1));

    for dim in [128, 384, 1024].iter() {
        let vectors = random_vectors(2000, *dim, 1);
        let pq = ProductQuantizer::train(
            &vectors,
            *dim,
            &PqConfig {
                num_subspaces: None,
                num_centroids: 256,
                kmeans_iterations: 5,
                training_sample_size: 2000,
                seed: 1,
            },
        )
        .unwrap();
        let lvq = LvqQuantizer::train(&vectors).unwrap();

        let query = &vectors[0];
        let pq_code = pq.encode(&vectors[1]).unwrap();
        let lvq_code = lvq.encode(&vectors[1]).unwrap().to_bytes();

        let pq_scorer = pq
            .score_function_for(query, VectorSimilarity::DotProduct)
            .unwrap();
        group.bench_with_input(BenchmarkId::new("pq", dim), dim, |b, _| {
            b.iter(|| black_box(pq_scorer.score(black_box(&pq_code))));
        });

        let lvq_scorer = lvq
            .score_function_for(query, VectorSimilarity::DotProduct)
            .unwrap();
        group.bench_with_input(BenchmarkId::new("lvq", dim), dim, |b, _| {
            b.iter(|| black_box(lvq_scorer.score(black_box(&lvq_code))));
        });
    }

    group.finish();
}

fn graph_search(c: &mut Criterion) {
    let dim = 64;
    let dir = tempfile::tempdir().unwrap();
    let mut config = IndexConfig::new(dir.path(), dim);
    config.graph.max_degree = 32;
    config.graph.search_width = 64;
    config.build_scoring = BuildScoring::Pq;
    config.pq.kmeans_iterations = 5;

    let vectors = random_vectors(10_000, dim, 2);
    IndexBuild::new(config.clone())
        .run(
            &MemoryDataset::from_vectors(vectors.clone(), 8),
            &MemoryContentStore::new(),
        )
        .unwrap();
    let index = SearchIndex::open(&config.paths(), SearchOptions::default()).unwrap();
    let queries = random_vectors(100, dim, 3);

    let mut group = c.benchmark_group("graph_search");
    group.throughput(Throughput::Elements(1));

    for top_k in [1, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(top_k), top_k, |b, &top_k| {
            let mut i = 0;
            b.iter(|| {
                let query = &queries[i % queries.len()];
                i += 1;
                black_box(index.search(black_box(query), top_k).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, codec_scoring, graph_search);
criterion_main!(benches);

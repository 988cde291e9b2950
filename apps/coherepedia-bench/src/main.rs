mod config;
mod dataset;

use coherepedia_index::{IndexBuild, MemoryContentStore, SearchIndex};
use dataset::RandomDataset;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "coherepedia-bench.yaml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        tracing::info!("Loading configuration from: {}", config_path);
        config::BenchConfig::load_from_file(&config_path)?
    } else {
        tracing::warn!("Config file {} not found, using defaults", config_path);
        config::BenchConfig::with_defaults("./coherepedia-bench-index", 1024)
    };

    let paths = config.index.paths();
    if !paths.ann.exists() {
        tracing::info!(
            "Building index of {} rows ({} dimensions) in {}",
            config.rows,
            config.index.dimension,
            config.index.index_dir.display()
        );
        let dataset = RandomDataset::new(
            config.rows,
            config.shards,
            config.index.dimension,
            config.seed,
        );
        let store = MemoryContentStore::new();
        let summary = IndexBuild::new(config.index.clone()).run(&dataset, &store)?;
        tracing::info!(
            "Built {} nodes in {:.1}s ({} bytes)",
            summary.nodes,
            summary.elapsed.as_secs_f64(),
            summary.graph_bytes
        );
    }

    let index = SearchIndex::open(&paths, config.index.search.clone())?;
    tracing::info!("Index ready: {} nodes", index.len());

    // Shard seeds are seed..seed+shards, queries take the next one.
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(config.shards as u64));
    let queries: Vec<Vec<f32>> = (0..config.queries)
        .map(|_| dataset::random_unit_vector(&mut rng, index.dimension()))
        .collect();

    let started = Instant::now();
    let timings = queries
        .par_iter()
        .map(|query| -> coherepedia_index::Result<(f64, usize)> {
            let t = Instant::now();
            let result = index.search(query, config.top_k)?;
            Ok((t.elapsed().as_secs_f64() * 1000.0, result.reranked_count))
        })
        .collect::<coherepedia_index::Result<Vec<_>>>()?;
    let wall = started.elapsed();

    let n = timings.len().max(1) as f64;
    let avg_ms = timings.iter().map(|(ms, _)| ms).sum::<f64>() / n;
    let avg_reranked = timings.iter().map(|(_, r)| *r as f64).sum::<f64>() / n;

    tracing::info!(
        "{} searches (top_k={}) in {:.2}s: avg {:.3} ms, avg {:.1} reranked",
        timings.len(),
        config.top_k,
        wall.as_secs_f64(),
        avg_ms,
        avg_reranked
    );
    Ok(())
}

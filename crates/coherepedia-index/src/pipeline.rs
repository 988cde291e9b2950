//! End-to-end index build.
//!
//! Reads every shard of a [`Dataset`] in parallel and produces the graph
//! file and the compressed-vector file under the configured directory.
//! Row content goes to the [`ContentStore`] under the same ids as the graph
//! nodes.
//!
//! A build either completes or fails as a whole. On failure the partial
//! graph file is removed; cached quantizer files are kept so a rerun can
//! skip training.

use crate::builder::GraphIndexBuilder;
use crate::collab::{ContentStore, Dataset};
use crate::compressed::PqVectors;
use crate::config::{BuildScoring, IndexConfig, IndexPaths};
use crate::error::{IndexError, Result};
use crate::lvq::LvqQuantizer;
use crate::pq::ProductQuantizer;
use crate::scoring::{BuildScoreProvider, ExactBuildScoreProvider, PqBuildScoreProvider};
use crate::writer::GraphWriter;
use coherepedia_observe::{obs_hist, BuildEvt, BuildKind, IndexEvent, Meter, NoopMeter};
use coherepedia_vector::NodeId;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Rows between progress reports.
const PROGRESS_INTERVAL: u64 = 100_000;

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    /// Nodes in the finished graph
    pub nodes: usize,
    /// Dataset shards processed
    pub shards: usize,
    /// Wall time of the whole build
    pub elapsed: Duration,
    /// Size of the graph file
    pub graph_bytes: u64,
    /// True if cached quantizers were loaded instead of trained
    pub quantizers_reused: bool,
}

/// Builds one index from a dataset.
pub struct IndexBuild {
    config: IndexConfig,
    meter: Arc<dyn Meter>,
}

impl IndexBuild {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            meter: Arc::new(NoopMeter),
        }
    }

    pub fn with_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.meter = meter;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Build the index. Refuses to overwrite an existing graph file.
    pub fn run(&self, dataset: &dyn Dataset, store: &dyn ContentStore) -> Result<BuildSummary> {
        self.config.validate()?;
        let paths = self.config.paths();
        if paths.ann.exists() {
            return Err(IndexError::AlreadyExists(paths.ann));
        }
        std::fs::create_dir_all(&self.config.index_dir)?;

        let result = self.build(&paths, dataset, store);
        if let Err(e) = &result {
            tracing::error!(index = %self.config.name, error = %e, "index build failed");
            if paths.ann.exists() {
                if let Err(rm) = std::fs::remove_file(&paths.ann) {
                    tracing::warn!(
                        path = %paths.ann.display(),
                        error = %rm,
                        "failed to remove partial graph file"
                    );
                }
            }
        }
        result
    }

    fn build(
        &self,
        paths: &IndexPaths,
        dataset: &dyn Dataset,
        store: &dyn ContentStore,
    ) -> Result<BuildSummary> {
        let started = Instant::now();
        let dimension = self.config.dimension;
        let similarity = self.config.similarity;

        let (pq, lvq, quantizers_reused) = self.quantizers(paths, dataset)?;
        if pq.dimensions() != dimension {
            return Err(IndexError::dimension_mismatch(dimension, pq.dimensions()));
        }
        if lvq.dimension() != dimension {
            return Err(IndexError::dimension_mismatch(dimension, lvq.dimension()));
        }

        let capacity = dataset.row_hint();
        let shards = dataset.shard_count();
        tracing::info!(
            index = %self.config.name,
            capacity,
            shards,
            scoring = ?self.config.build_scoring,
            "building graph"
        );

        let vectors = Arc::new(PqVectors::with_capacity(pq, capacity));
        let exact_scoring = self.config.build_scoring == BuildScoring::Exact;
        let scores: Box<dyn BuildScoreProvider> = if exact_scoring {
            Box::new(ExactBuildScoreProvider::new(capacity, dimension, similarity))
        } else {
            Box::new(PqBuildScoreProvider::new(Arc::clone(&vectors), similarity))
        };

        let mut builder =
            GraphIndexBuilder::new(dimension, self.config.graph.clone(), capacity, scores)
                .with_meter(Arc::clone(&self.meter), self.config.name.clone());
        let mut writer = GraphWriter::create(
            &paths.ann,
            dimension,
            self.config.graph.max_degree,
            similarity,
            &lvq,
        )?;

        let next_id = AtomicU32::new(0);
        let inserted = AtomicU64::new(0);

        (0..shards).into_par_iter().try_for_each(|shard| {
            let mut rows = 0u64;
            dataset.for_each_row(shard, &mut |record, embedding| {
                let id: NodeId = next_id.fetch_add(1, Ordering::Relaxed);
                if id as usize >= capacity {
                    return Err(IndexError::CapacityExceeded { id, capacity });
                }

                writer.write_inline(id, &lvq.encode(embedding)?.to_bytes())?;
                if exact_scoring {
                    vectors.encode_and_set(id, embedding)?;
                }
                builder.add_node(id, embedding)?;
                store.put(id, record)?;

                rows += 1;
                let total = inserted.fetch_add(1, Ordering::Relaxed) + 1;
                if total % PROGRESS_INTERVAL == 0 {
                    tracing::info!(nodes = total, "insertion progress");
                    self.emit(BuildKind::Progress { nodes: total });
                }
                Ok(())
            })?;

            tracing::info!(shard, rows, "shard complete");
            self.emit(BuildKind::ShardDone {
                shard: shard as u32,
                rows,
            });
            Ok::<(), IndexError>(())
        })?;

        let nodes = inserted.load(Ordering::Acquire) as usize;
        let counts = [
            ("graph", builder.size()),
            ("compressed vectors", vectors.len()),
            ("content store", store.len()),
        ];
        for (what, count) in counts {
            if count != nodes {
                return Err(IndexError::Integrity(format!(
                    "{} holds {} entries, expected {}",
                    what, count, nodes
                )));
            }
        }

        builder.cleanup()?;
        writer.write_adjacency(builder.graph())?;
        let graph_bytes = writer.close()?;
        vectors.save(&paths.pqv)?;

        let elapsed = started.elapsed();
        obs_hist!(self.meter, "ann_build_duration_ms", &[], elapsed.as_millis());
        self.emit(BuildKind::IndexWritten {
            nodes: nodes as u64,
            bytes: graph_bytes,
        });
        tracing::info!(
            index = %self.config.name,
            nodes,
            graph_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "index written"
        );

        Ok(BuildSummary {
            nodes,
            shards,
            elapsed,
            graph_bytes,
            quantizers_reused,
        })
    }

    /// Load cached quantizers, or train both from the first shard and
    /// cache them.
    fn quantizers(
        &self,
        paths: &IndexPaths,
        dataset: &dyn Dataset,
    ) -> Result<(ProductQuantizer, LvqQuantizer, bool)> {
        if paths.has_cached_quantizers() {
            let pq = ProductQuantizer::load(&paths.pq)?;
            let lvq = LvqQuantizer::load(&paths.lvq)?;
            tracing::info!(
                pq = %paths.pq.display(),
                lvq = %paths.lvq.display(),
                "loaded cached quantizers"
            );
            self.emit(BuildKind::QuantizersLoaded);
            return Ok((pq, lvq, true));
        }

        if dataset.shard_count() == 0 {
            return Err(IndexError::Collaborator(
                "dataset has no shards".to_string(),
            ));
        }

        let started = Instant::now();
        let limit = self.config.pq.training_sample_size;
        let mut sample: Vec<Vec<f32>> = Vec::new();
        dataset.for_each_row(0, &mut |_, embedding| {
            if sample.len() < limit {
                sample.push(embedding.to_vec());
            }
            Ok(())
        })?;
        tracing::info!(samples = sample.len(), "training quantizers");

        let pq = ProductQuantizer::train(&sample, self.config.dimension, &self.config.pq)?;
        let lvq = LvqQuantizer::train(&sample)?;
        pq.save(&paths.pq)?;
        lvq.save(&paths.lvq)?;

        let ms = started.elapsed().as_millis() as u32;
        tracing::info!(
            samples = sample.len(),
            subspaces = pq.num_subspaces(),
            centroids = pq.num_centroids(),
            ms,
            "quantizers trained"
        );
        self.emit(BuildKind::QuantizersTrained {
            samples: sample.len(),
            ms,
        });
        Ok((pq, lvq, false))
    }

    fn emit(&self, kind: BuildKind) {
        self.meter.emit(IndexEvent::Build(BuildEvt {
            index: self.config.name.clone(),
            kind,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{MemoryContentStore, MemoryDataset};
    use crate::config::PqConfig;
    use crate::disk::OnDiskGraph;

    fn small_config(dir: &std::path::Path) -> IndexConfig {
        let mut config = IndexConfig::new(dir, 4);
        config.graph.max_degree = 4;
        config.graph.search_width = 16;
        config.pq = PqConfig {
            num_subspaces: Some(2),
            num_centroids: 16,
            kmeans_iterations: 5,
            training_sample_size: 100,
            seed: 7,
        };
        config
    }

    fn vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let x = i as f32 * 0.37;
                vec![x.sin(), x.cos(), (x * 0.5).sin(), 1.0]
            })
            .collect()
    }

    #[test]
    fn test_build_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let paths = config.paths();
        let dataset = MemoryDataset::from_vectors(vectors(120), 3);
        let store = MemoryContentStore::new();

        let summary = IndexBuild::new(config).run(&dataset, &store).unwrap();

        assert_eq!(summary.nodes, 120);
        assert_eq!(summary.shards, 3);
        assert!(!summary.quantizers_reused);
        assert_eq!(store.len(), 120);
        for path in [&paths.ann, &paths.pq, &paths.pqv, &paths.lvq] {
            assert!(path.exists(), "{} missing", path.display());
        }

        let graph = OnDiskGraph::open(&paths.ann).unwrap();
        assert_eq!(graph.size(), 120);
        assert!(graph.entry_node().is_some());
        assert_eq!(
            std::fs::metadata(&paths.ann).unwrap().len(),
            summary.graph_bytes
        );
    }

    #[test]
    fn test_refuses_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        std::fs::write(config.paths().ann, b"old").unwrap();

        let dataset = MemoryDataset::from_vectors(vectors(10), 1);
        let result = IndexBuild::new(config.clone()).run(&dataset, &MemoryContentStore::new());

        assert!(matches!(result, Err(IndexError::AlreadyExists(_))));
        assert_eq!(std::fs::read(config.paths().ann).unwrap(), b"old");
    }

    #[test]
    fn test_reuses_cached_quantizers() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let paths = config.paths();
        let dataset = MemoryDataset::from_vectors(vectors(40), 2);

        IndexBuild::new(config.clone())
            .run(&dataset, &MemoryContentStore::new())
            .unwrap();
        std::fs::remove_file(&paths.ann).unwrap();
        std::fs::remove_file(&paths.pqv).unwrap();

        let summary = IndexBuild::new(config)
            .run(&dataset, &MemoryContentStore::new())
            .unwrap();
        assert!(summary.quantizers_reused);
        assert_eq!(summary.nodes, 40);
    }

    #[test]
    fn test_failed_build_removes_graph_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.pq.training_sample_size = 10;
        let paths = config.paths();

        // Row 13 is past the training sample, so the graph file exists by
        // the time it is rejected.
        let mut rows = vectors(20);
        rows[13] = vec![0.0; 3];
        let dataset = MemoryDataset::from_vectors(rows, 1);

        let result = IndexBuild::new(config).run(&dataset, &MemoryContentStore::new());

        assert!(matches!(result, Err(IndexError::Vector(_))));
        assert!(!paths.ann.exists());
        assert!(!paths.pqv.exists());
    }

    #[test]
    fn test_content_store_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        let dataset = MemoryDataset::from_vectors(vectors(20), 1);

        let store = MemoryContentStore::new();
        store.put(999, b"stale".to_vec()).unwrap();

        let result = IndexBuild::new(config.clone()).run(&dataset, &store);
        assert!(matches!(result, Err(IndexError::Integrity(_))));
        assert!(!config.paths().ann.exists());
    }
}

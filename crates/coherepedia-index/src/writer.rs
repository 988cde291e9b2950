//! Graph file writer.
//!
//! Feature blocks are written while the graph is still being built, one
//! positional write per node, from any thread. Adjacency lists follow once
//! construction has finished, and the header goes in last so that a
//! half-written file is never mistaken for a finished one.

use crate::error::{IndexError, Result};
use crate::format::{self, GraphHeader, NO_NODE};
use crate::graph::ConcurrentGraph;
use crate::lvq::LvqQuantizer;
use coherepedia_vector::{NodeId, VectorSimilarity};
use rayon::prelude::*;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(unix)]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;

    pub fn write_at_offset(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
        file.write_at(buf, offset)
    }
}

#[cfg(windows)]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::windows::fs::FileExt;

    pub fn write_at_offset(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
        file.seek_write(buf, offset)
    }
}

fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match platform::write_at_offset(file, &buf[written..], offset + written as u64)? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            n => written += n,
        }
    }
    Ok(())
}

/// Writes one graph file.
pub struct GraphWriter {
    file: File,
    path: PathBuf,
    dimension: usize,
    max_degree: usize,
    feature_size: usize,
    record_size: usize,
    header_len: usize,
    similarity: VectorSimilarity,
    lvq_bytes: Vec<u8>,
    inline_writes: AtomicU64,
    /// Set by `write_adjacency`
    finished: Option<(u32, NodeId)>,
}

impl GraphWriter {
    /// Create (or truncate) the graph file and reserve its header region.
    pub fn create(
        path: impl AsRef<Path>,
        dimension: usize,
        max_degree: usize,
        similarity: VectorSimilarity,
        lvq: &LvqQuantizer,
    ) -> Result<Self> {
        if lvq.dimension() != dimension {
            return Err(IndexError::dimension_mismatch(dimension, lvq.dimension()));
        }
        if max_degree == 0 {
            return Err(IndexError::Format("degree bound must be > 0".to_string()));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let lvq_bytes = lvq.to_bytes();
        let header_len = format::header_len(lvq_bytes.len());
        let feature_size = lvq.code_size();
        file.set_len(header_len as u64)?;

        Ok(Self {
            file,
            path,
            dimension,
            max_degree,
            feature_size,
            record_size: format::record_size(max_degree, feature_size),
            header_len,
            similarity,
            lvq_bytes,
            inline_writes: AtomicU64::new(0),
            finished: None,
        })
    }

    fn record_offset(&self, id: NodeId) -> u64 {
        self.header_len as u64 + id as u64 * self.record_size as u64
    }

    /// Write the feature block of node `id`.
    ///
    /// Safe to call concurrently for distinct ids.
    pub fn write_inline(&self, id: NodeId, feature: &[u8]) -> Result<()> {
        if feature.len() != self.feature_size {
            return Err(IndexError::Format(format!(
                "feature block is {} bytes, expected {}",
                feature.len(),
                self.feature_size
            )));
        }

        let offset = self.record_offset(id) + 4 + 4 * self.max_degree as u64;
        write_all_at(&self.file, feature, offset)?;
        self.inline_writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Number of feature blocks written so far.
    pub fn inline_writes(&self) -> u64 {
        self.inline_writes.load(Ordering::Acquire)
    }

    /// Write the final neighbor list of every node.
    ///
    /// The graph's ids must be exactly `0..size`, each with a feature block
    /// already written and at most `max_degree` neighbors.
    pub fn write_adjacency(&mut self, graph: &ConcurrentGraph) -> Result<()> {
        let n = graph.size();
        let inline = self.inline_writes();
        if inline != n as u64 {
            return Err(IndexError::Integrity(format!(
                "{} feature blocks written for {} nodes",
                inline, n
            )));
        }
        if let Some(missing) = (0..n as NodeId).find(|&id| !graph.contains(id)) {
            return Err(IndexError::Integrity(format!(
                "node ids are not dense: {} missing of {}",
                missing, n
            )));
        }

        let max_degree = self.max_degree;
        let this = &*self;
        (0..n as NodeId).into_par_iter().try_for_each(|id| {
            let neighbors = graph.neighbors(id);
            if neighbors.len() > max_degree {
                return Err(IndexError::Integrity(format!(
                    "node {} has {} neighbors, bound is {}",
                    id,
                    neighbors.len(),
                    max_degree
                )));
            }

            let mut buf = Vec::with_capacity(4 + 4 * max_degree);
            buf.extend_from_slice(&(neighbors.len() as u32).to_le_bytes());
            for &neighbor in &neighbors {
                if neighbor as usize >= n {
                    return Err(IndexError::Integrity(format!(
                        "node {} links to unknown node {}",
                        id, neighbor
                    )));
                }
                buf.extend_from_slice(&neighbor.to_le_bytes());
            }
            for _ in neighbors.len()..max_degree {
                buf.extend_from_slice(&NO_NODE.to_le_bytes());
            }

            write_all_at(&this.file, &buf, this.record_offset(id))?;
            Ok(())
        })?;

        self.file
            .set_len(self.header_len as u64 + (n * self.record_size) as u64)?;
        self.finished = Some((n as u32, graph.entry_node().unwrap_or(NO_NODE)));
        tracing::debug!(path = %self.path.display(), nodes = n, "adjacency written");
        Ok(())
    }

    /// Sync the node records, then write and sync the header.
    ///
    /// Returns the final file size in bytes.
    pub fn close(self) -> Result<u64> {
        let (node_count, entry_node) = self.finished.ok_or_else(|| {
            IndexError::Integrity("closing graph file before adjacency was written".to_string())
        })?;

        self.file.sync_data()?;

        let header = GraphHeader {
            dimension: self.dimension as u32,
            node_count,
            max_degree: self.max_degree as u32,
            entry_node,
            feature_size: self.feature_size as u32,
            record_size: self.record_size as u32,
            header_len: self.header_len as u64,
            similarity: self.similarity,
        };
        write_all_at(&self.file, &header.encode(&self.lvq_bytes), 0)?;
        self.file.sync_all()?;

        let bytes = self.file.metadata()?.len();
        tracing::info!(path = %self.path.display(), nodes = node_count, bytes, "graph file closed");
        Ok(bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lvq(dim: usize) -> LvqQuantizer {
        LvqQuantizer::from_mean(vec![0.0; dim])
    }

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let writer = GraphWriter::create(
            dir.path().join("g.ann"),
            4,
            3,
            VectorSimilarity::Cosine,
            &lvq(4),
        )
        .unwrap();

        assert_eq!(writer.record_size(), 4 + 12 + 12);
        assert_eq!(writer.header_len(), 4096);
    }

    #[test]
    fn test_inline_write_validates_size() {
        let dir = tempfile::tempdir().unwrap();
        let writer = GraphWriter::create(
            dir.path().join("g.ann"),
            4,
            3,
            VectorSimilarity::Cosine,
            &lvq(4),
        )
        .unwrap();

        assert!(writer.write_inline(0, &[0u8; 5]).is_err());
        writer.write_inline(0, &[0u8; 12]).unwrap();
        assert_eq!(writer.inline_writes(), 1);
    }

    #[test]
    fn test_adjacency_requires_inline_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GraphWriter::create(
            dir.path().join("g.ann"),
            2,
            2,
            VectorSimilarity::Euclidean,
            &lvq(2),
        )
        .unwrap();

        let graph = ConcurrentGraph::new(2, 2);
        graph.claim(0).unwrap();
        graph.claim(1).unwrap();
        writer.write_inline(0, &[0u8; 10]).unwrap();

        assert!(matches!(
            writer.write_adjacency(&graph),
            Err(IndexError::Integrity(_))
        ));
    }

    #[test]
    fn test_adjacency_rejects_oversized_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GraphWriter::create(
            dir.path().join("g.ann"),
            2,
            1,
            VectorSimilarity::Euclidean,
            &lvq(2),
        )
        .unwrap();

        let graph = ConcurrentGraph::new(3, 1);
        for id in 0..3 {
            graph.claim(id).unwrap();
            writer.write_inline(id, &[0u8; 10]).unwrap();
        }
        graph.set_neighbors(0, vec![1, 2]).unwrap();

        assert!(matches!(
            writer.write_adjacency(&graph),
            Err(IndexError::Integrity(_))
        ));
    }

    #[test]
    fn test_close_before_adjacency_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ann");
        let writer =
            GraphWriter::create(&path, 2, 2, VectorSimilarity::Euclidean, &lvq(2)).unwrap();

        assert!(matches!(writer.close(), Err(IndexError::Integrity(_))));
        // Header never written
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[..64].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_close_writes_exact_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.ann");
        let mut writer =
            GraphWriter::create(&path, 2, 2, VectorSimilarity::Euclidean, &lvq(2)).unwrap();

        let graph = ConcurrentGraph::new(8, 2);
        for id in 0..3 {
            graph.claim(id).unwrap();
            writer.write_inline(id, &[id as u8; 10]).unwrap();
        }
        graph.try_set_entry(0);
        graph.set_neighbors(0, vec![1, 2]).unwrap();
        graph.set_neighbors(1, vec![0]).unwrap();

        writer.write_adjacency(&graph).unwrap();
        let record = writer.record_size() as u64;
        let header = writer.header_len() as u64;
        let bytes = writer.close().unwrap();

        assert_eq!(bytes, header + 3 * record);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), bytes);
    }
}

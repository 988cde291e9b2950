//! Read-only, memory-mapped graph file.

use crate::error::{IndexError, Result};
use crate::format::{self, GraphHeader, NO_NODE};
use crate::lvq::{LvqQuantizer, LvqScoreFunction};
use crate::scoring::ScoreFunction;
use coherepedia_vector::{NodeId, VectorSimilarity};
use std::fs::File;
use std::path::Path;

/// A finished graph file, mapped into memory.
///
/// Immutable and `Sync`; any number of searches can share one instance.
pub struct OnDiskGraph {
    mmap: memmap2::Mmap,
    header: GraphHeader,
    lvq: LvqQuantizer,
}

impl OnDiskGraph {
    /// Map and validate a graph file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: graph files are never modified after `GraphWriter::close`.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };

        let (header, lvq_bytes) = GraphHeader::decode(&mmap)?;
        let lvq = LvqQuantizer::from_bytes(lvq_bytes)?;

        if header.dimension as usize != lvq.dimension() {
            return Err(IndexError::Format(format!(
                "header dimension {} does not match quantizer dimension {}",
                header.dimension,
                lvq.dimension()
            )));
        }
        if header.feature_size as usize != lvq.code_size() {
            return Err(IndexError::Format(format!(
                "feature size {} does not match quantizer code size {}",
                header.feature_size,
                lvq.code_size()
            )));
        }
        let expected_record =
            format::record_size(header.max_degree as usize, header.feature_size as usize);
        if header.record_size as usize != expected_record || header.max_degree == 0 {
            return Err(IndexError::Format(format!(
                "record size {} invalid for degree bound {}",
                header.record_size, header.max_degree
            )));
        }
        if header.header_len != format::header_len(lvq_bytes.len()) as u64 {
            return Err(IndexError::Format(format!(
                "unexpected header length {}",
                header.header_len
            )));
        }

        let expected_len =
            header.header_len + header.node_count as u64 * header.record_size as u64;
        if mmap.len() as u64 != expected_len {
            return Err(IndexError::Format(format!(
                "file is {} bytes, expected {} for {} nodes",
                mmap.len(),
                expected_len,
                header.node_count
            )));
        }

        let entry_ok = match header.node_count {
            0 => header.entry_node == NO_NODE,
            n => header.entry_node < n,
        };
        if !entry_ok {
            return Err(IndexError::Format(format!(
                "entry node {} invalid for {} nodes",
                header.entry_node, header.node_count
            )));
        }

        let graph = Self { mmap, header, lvq };
        graph.check_adjacency()?;
        Ok(graph)
    }

    /// Adjacency lies outside the checksum, so every record is bounds-checked
    /// once before the graph is served.
    fn check_adjacency(&self) -> Result<()> {
        let n = self.header.node_count;
        for id in 0..n {
            let record = self.record(id).ok_or_else(|| {
                IndexError::Format(format!("node {} record out of bounds", id))
            })?;
            let count = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            if count > self.header.max_degree {
                return Err(IndexError::Format(format!(
                    "node {} has {} neighbors, degree bound is {}",
                    id, count, self.header.max_degree
                )));
            }
            for slot in record[4..4 + 4 * count as usize].chunks_exact(4) {
                let neighbor = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
                if neighbor >= n {
                    return Err(IndexError::Format(format!(
                        "node {} links to {} of {} nodes",
                        id, neighbor, n
                    )));
                }
            }
        }
        Ok(())
    }

    fn record(&self, id: NodeId) -> Option<&[u8]> {
        if id >= self.header.node_count {
            return None;
        }
        let size = self.header.record_size as usize;
        let start = self.header.header_len as usize + id as usize * size;
        self.mmap.get(start..start + size)
    }

    /// Neighbors of `id`, empty if `id` is out of range.
    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let slots: &[u8] = match self.record(id) {
            Some(record) => {
                let count = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
                let count = (count as usize).min(self.header.max_degree as usize);
                &record[4..4 + 4 * count]
            }
            None => &[],
        };
        slots
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Inline Codec B code of `id`.
    pub fn feature(&self, id: NodeId) -> Option<&[u8]> {
        let record = self.record(id)?;
        let start = 4 + 4 * self.header.max_degree as usize;
        Some(&record[start..])
    }

    /// Exact-ish scorer over the inline feature blocks.
    pub fn rerank_scorer<'a>(
        &'a self,
        query: &'a [f32],
        similarity: VectorSimilarity,
    ) -> Result<FeatureScorer<'a>> {
        Ok(FeatureScorer {
            graph: self,
            score: self.lvq.score_function_for(query, similarity)?,
        })
    }

    /// Codec B parameters embedded in the header.
    pub fn lvq(&self) -> &LvqQuantizer {
        &self.lvq
    }

    pub fn entry_node(&self) -> Option<NodeId> {
        match self.header.entry_node {
            NO_NODE => None,
            id => Some(id),
        }
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        self.header.node_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn max_degree(&self) -> usize {
        self.header.max_degree as usize
    }

    pub fn dimension(&self) -> usize {
        self.header.dimension as usize
    }

    /// Similarity the graph was built for.
    pub fn similarity(&self) -> VectorSimilarity {
        self.header.similarity
    }
}

/// Codec B scorer addressed by node id.
pub struct FeatureScorer<'a> {
    graph: &'a OnDiskGraph,
    score: LvqScoreFunction<'a>,
}

impl ScoreFunction for FeatureScorer<'_> {
    fn score(&self, node: NodeId) -> f32 {
        self.graph
            .feature(node)
            .map(|f| self.score.score(f))
            .unwrap_or(0.0)
    }
}

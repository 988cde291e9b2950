//! Per-node Codec A codes (`.pqv` file).
//!
//! During a build the codes are written concurrently into write-once
//! slots; once loaded from disk they live in one flat buffer. Either way a
//! node's code is found by id alone.
//!
//! # File layout
//!
//! ```text
//! [magic: u64 "CPDPQVEC"] [version: u32]
//! [codebook_len: u64] [codebook bytes]
//! [count: u64] [code_size: u32] [codes: count * code_size]
//! [crc32c: u32]
//! ```

use crate::error::{IndexError, Result};
use crate::format::{self, FORMAT_VERSION, PQV_MAGIC};
use crate::pq::{PqScoreFunction, ProductQuantizer};
use crate::scoring::ScoreFunction;
use coherepedia_vector::{NodeId, VectorSimilarity};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

enum Codes {
    /// Write-once slots filled concurrently during a build
    Building(Vec<OnceLock<Box<[u8]>>>),
    /// Dense codes for ids `0..count`
    Loaded { codes: Vec<u8>, count: usize },
}

/// Codec A codebook plus the code of every node.
pub struct PqVectors {
    pq: ProductQuantizer,
    codes: Codes,
    set_count: AtomicUsize,
}

impl PqVectors {
    /// Empty store with room for ids `0..capacity`.
    pub fn with_capacity(pq: ProductQuantizer, capacity: usize) -> Self {
        Self {
            pq,
            codes: Codes::Building((0..capacity).map(|_| OnceLock::new()).collect()),
            set_count: AtomicUsize::new(0),
        }
    }

    /// Store the code for `id`. Each id can be set once.
    pub fn set(&self, id: NodeId, code: Vec<u8>) -> Result<()> {
        self.pq.check_code(&code)?;

        let slots = match &self.codes {
            Codes::Building(slots) => slots,
            Codes::Loaded { .. } => {
                return Err(IndexError::Integrity(
                    "compressed vectors loaded from disk are read-only".to_string(),
                ))
            }
        };

        let slot = slots.get(id as usize).ok_or(IndexError::CapacityExceeded {
            id,
            capacity: slots.len(),
        })?;
        slot.set(code.into_boxed_slice())
            .map_err(|_| IndexError::DuplicateNode(id))?;
        self.set_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Encode `vector` and store its code for `id`.
    pub fn encode_and_set(&self, id: NodeId, vector: &[f32]) -> Result<()> {
        let code = self.pq.encode(vector)?;
        self.set(id, code)
    }

    /// Code for `id`, if present.
    #[inline]
    pub fn code(&self, id: NodeId) -> Option<&[u8]> {
        match &self.codes {
            Codes::Building(slots) => slots.get(id as usize)?.get().map(|c| &c[..]),
            Codes::Loaded { codes, count } => {
                let id = id as usize;
                if id >= *count {
                    return None;
                }
                let size = self.pq.code_size();
                Some(&codes[id * size..(id + 1) * size])
            }
        }
    }

    /// Number of stored codes.
    pub fn len(&self) -> usize {
        self.set_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pq(&self) -> &ProductQuantizer {
        &self.pq
    }

    pub fn dimension(&self) -> usize {
        self.pq.dimensions()
    }

    /// Node scorer for a query, backed by the codebook's lookup tables.
    pub fn score_function_for(
        &self,
        query: &[f32],
        similarity: VectorSimilarity,
    ) -> Result<PqNodeScorer<'_>> {
        Ok(PqNodeScorer {
            table: self.pq.score_function_for(query, similarity)?,
            vectors: self,
        })
    }

    /// Serialize codebook and codes. Codes must be dense over `0..len()`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let count = self.len();
        let code_size = self.pq.code_size();
        let codebook = self.pq.to_bytes();

        let mut bytes = Vec::with_capacity(40 + codebook.len() + count * code_size);
        bytes.extend_from_slice(&PQV_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(codebook.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&codebook);
        bytes.extend_from_slice(&(count as u64).to_le_bytes());
        bytes.extend_from_slice(&(code_size as u32).to_le_bytes());

        for id in 0..count {
            let code = self.code(id as NodeId).ok_or_else(|| {
                IndexError::Integrity(format!(
                    "missing code for node {} of {}",
                    id, count
                ))
            })?;
            bytes.extend_from_slice(code);
        }

        format::seal(&mut bytes);
        Ok(bytes)
    }

    /// Deserialize a store written by [`PqVectors::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = format::unseal(bytes)?;
        let mut r = format::preamble(body, PQV_MAGIC, "compressed vectors")?;

        let codebook_len = r.u64()? as usize;
        let pq = ProductQuantizer::from_bytes(r.bytes(codebook_len)?)?;

        let count = r.u64()? as usize;
        let code_size = r.u32()? as usize;
        if code_size != pq.code_size() {
            return Err(IndexError::Format(format!(
                "compressed vectors: code size {} does not match codebook ({})",
                code_size,
                pq.code_size()
            )));
        }

        let total = count.checked_mul(code_size).ok_or_else(|| {
            IndexError::Format(format!("compressed vectors: count {} overflows", count))
        })?;
        let codes = r.bytes(total)?.to_vec();
        if !r.is_empty() {
            return Err(IndexError::Format(
                "compressed vectors: trailing bytes".to_string(),
            ));
        }
        if code_size > 0 {
            for (id, code) in codes.chunks_exact(code_size).enumerate() {
                pq.check_code(code).map_err(|e| {
                    IndexError::Format(format!("compressed vectors: node {}: {}", id, e))
                })?;
            }
        }

        Ok(Self {
            pq,
            codes: Codes::Loaded { codes, count },
            set_count: AtomicUsize::new(count),
        })
    }

    /// Write to a `.pqv` file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Read a `.pqv` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// Approximate scorer over stored PQ codes, addressed by node id.
pub struct PqNodeScorer<'a> {
    table: PqScoreFunction<'a>,
    vectors: &'a PqVectors,
}

impl ScoreFunction for PqNodeScorer<'_> {
    /// Nodes without a code score 0.0.
    #[inline]
    fn score(&self, node: NodeId) -> f32 {
        self.vectors
            .code(node)
            .map(|code| self.table.score(code))
            .unwrap_or(0.0)
    }
}

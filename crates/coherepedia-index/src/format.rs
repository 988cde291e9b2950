//! On-disk format constants and layout.
//!
//! # Graph file (`.ann`)
//!
//! ```text
//! [Header, padded to header_len] [Node 0] [Node 1] ... [Node n-1]
//! ```
//!
//! Every node record has the same size, so node `id` lives at
//! `header_len + id * record_size`:
//!
//! ```text
//! [count: u32] [neighbor: u32; max_degree] [feature block: feature_size]
//! ```
//!
//! Unused neighbor slots hold `NO_NODE`. The feature block is a Codec B
//! code (`bias f32 | scale f32 | dimension x u8`).
//!
//! ## Header (first 64 bytes, then the embedded Codec B parameters)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0-7    | 8    | magic: u64 "CPDANNGR" |
//! | 8-11   | 4    | version: u32 |
//! | 12-15  | 4    | dimension: u32 |
//! | 16-19  | 4    | node_count: u32 |
//! | 20-23  | 4    | max_degree: u32 |
//! | 24-27  | 4    | entry_node: u32 (`NO_NODE` if empty) |
//! | 28-31  | 4    | feature_size: u32 |
//! | 32-35  | 4    | record_size: u32 |
//! | 36-43  | 8    | header_len: u64 |
//! | 44-47  | 4    | lvq_len: u32 |
//! | 48     | 1    | similarity: u8 |
//! | 49-59  | 11   | reserved |
//! | 60-63  | 4    | crc32c: u32 over bytes 0..60 and the Codec B bytes |
//!
//! The header is written last. A file whose build never reached `close`
//! still has an all-zero header and is rejected on open.
//!
//! # Quantizer and compressed-vector files
//!
//! `.pq`, `.lvq` and `.pqv` each start with their own u64 magic and u32
//! version and end with a CRC32C of everything before it.

use crate::error::{IndexError, Result};
use coherepedia_vector::{NodeId, VectorSimilarity};

/// Graph file magic number "CPDANNGR" in little-endian.
pub const GRAPH_MAGIC: u64 = u64::from_le_bytes(*b"CPDANNGR");

/// Codec A codebook magic "CPDPQCBK".
pub const PQ_MAGIC: u64 = u64::from_le_bytes(*b"CPDPQCBK");

/// Codec B parameters magic "CPDLVQPM".
pub const LVQ_MAGIC: u64 = u64::from_le_bytes(*b"CPDLVQPM");

/// Compressed-vector file magic "CPDPQVEC".
pub const PQV_MAGIC: u64 = u64::from_le_bytes(*b"CPDPQVEC");

/// Format version shared by every file.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed part of the graph header.
pub const HEADER_FIXED_SIZE: usize = 64;

/// Header region is padded to a page boundary so node records are aligned.
pub const HEADER_ALIGN: usize = 4096;

/// Padding value for unused neighbor slots and the empty entry node.
pub const NO_NODE: NodeId = u32::MAX;

/// Size of a node record for a given degree bound and feature size.
pub fn record_size(max_degree: usize, feature_size: usize) -> usize {
    4 + 4 * max_degree + feature_size
}

/// Header region length needed to embed `lvq_len` bytes of Codec B state.
pub fn header_len(lvq_len: usize) -> usize {
    (HEADER_FIXED_SIZE + lvq_len).div_ceil(HEADER_ALIGN) * HEADER_ALIGN
}

/// Graph file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphHeader {
    /// Vector dimension.
    pub dimension: u32,
    /// Number of node records.
    pub node_count: u32,
    /// Degree bound R.
    pub max_degree: u32,
    /// Traversal start node, `NO_NODE` for an empty graph.
    pub entry_node: NodeId,
    /// Bytes per inline feature block.
    pub feature_size: u32,
    /// Bytes per node record.
    pub record_size: u32,
    /// Offset of node 0.
    pub header_len: u64,
    /// Similarity the graph was built for.
    pub similarity: VectorSimilarity,
}

impl GraphHeader {
    /// Encodes the header followed by the Codec B bytes, zero-padded to
    /// `header_len`.
    pub fn encode(&self, lvq_bytes: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; self.header_len as usize];

        buf[0..8].copy_from_slice(&GRAPH_MAGIC.to_le_bytes());
        buf[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[12..16].copy_from_slice(&self.dimension.to_le_bytes());
        buf[16..20].copy_from_slice(&self.node_count.to_le_bytes());
        buf[20..24].copy_from_slice(&self.max_degree.to_le_bytes());
        buf[24..28].copy_from_slice(&self.entry_node.to_le_bytes());
        buf[28..32].copy_from_slice(&self.feature_size.to_le_bytes());
        buf[32..36].copy_from_slice(&self.record_size.to_le_bytes());
        buf[36..44].copy_from_slice(&self.header_len.to_le_bytes());
        buf[44..48].copy_from_slice(&(lvq_bytes.len() as u32).to_le_bytes());
        buf[48] = self.similarity.to_u8();
        // 49..60: reserved

        buf[HEADER_FIXED_SIZE..HEADER_FIXED_SIZE + lvq_bytes.len()].copy_from_slice(lvq_bytes);

        let crc = crc32c::crc32c_append(crc32c::crc32c(&buf[0..60]), lvq_bytes);
        buf[60..64].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decodes the header from the start of a graph file, returning it with
    /// the embedded Codec B bytes.
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8])> {
        if buf.len() < HEADER_FIXED_SIZE {
            return Err(IndexError::Format(format!(
                "file too short for header: {} bytes",
                buf.len()
            )));
        }

        let mut r = ByteReader::new(&buf[..HEADER_FIXED_SIZE]);
        let magic = r.u64()?;
        if magic != GRAPH_MAGIC {
            return Err(IndexError::Format(format!(
                "invalid magic number: {:#x} (unfinished or foreign file)",
                magic
            )));
        }

        let version = r.u32()?;
        let dimension = r.u32()?;
        let node_count = r.u32()?;
        let max_degree = r.u32()?;
        let entry_node = r.u32()?;
        let feature_size = r.u32()?;
        let record_size = r.u32()?;
        let header_len = r.u64()?;
        let lvq_len = r.u32()? as usize;
        let similarity_tag = r.u8()?;

        let lvq_end = HEADER_FIXED_SIZE + lvq_len;
        if lvq_end > buf.len() || lvq_end as u64 > header_len {
            return Err(IndexError::Format(format!(
                "embedded quantizer ({} bytes) exceeds header",
                lvq_len
            )));
        }
        let lvq_bytes = &buf[HEADER_FIXED_SIZE..lvq_end];

        let expected_crc = u32::from_le_bytes([buf[60], buf[61], buf[62], buf[63]]);
        let actual_crc = crc32c::crc32c_append(crc32c::crc32c(&buf[0..60]), lvq_bytes);
        if expected_crc != actual_crc {
            return Err(IndexError::CrcMismatch {
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        if version != FORMAT_VERSION {
            return Err(IndexError::Format(format!(
                "unsupported version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let similarity = VectorSimilarity::from_u8(similarity_tag).ok_or_else(|| {
            IndexError::Format(format!("unknown similarity tag {}", similarity_tag))
        })?;

        let header = GraphHeader {
            dimension,
            node_count,
            max_degree,
            entry_node,
            feature_size,
            record_size,
            header_len,
            similarity,
        };

        Ok((header, lvq_bytes))
    }
}

/// Append a CRC32C trailer covering everything already in `buf`.
pub(crate) fn seal(buf: &mut Vec<u8>) {
    let crc = crc32c::crc32c(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Verify and strip the CRC32C trailer written by [`seal`].
pub(crate) fn unseal(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < 4 {
        return Err(IndexError::Format("missing checksum trailer".to_string()));
    }
    let (body, trailer) = buf.split_at(buf.len() - 4);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32c::crc32c(body);
    if expected != actual {
        return Err(IndexError::CrcMismatch { expected, actual });
    }
    Ok(body)
}

/// Check a file preamble (magic + version) and return a reader past it.
pub(crate) fn preamble<'a>(body: &'a [u8], magic: u64, what: &str) -> Result<ByteReader<'a>> {
    let mut r = ByteReader::new(body);
    let found = r.u64()?;
    if found != magic {
        return Err(IndexError::Format(format!(
            "{}: invalid magic number {:#x}",
            what, found
        )));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Format(format!(
            "{}: unsupported version {}",
            what, version
        )));
    }
    Ok(r)
}

/// Little-endian cursor over a byte slice that reports truncation as a
/// format error instead of panicking.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                IndexError::Format(format!(
                    "unexpected end of data at offset {} (wanted {} bytes)",
                    self.pos, n
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub(crate) fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub(crate) fn f32_vec(&mut self, n: usize) -> Result<Vec<f32>> {
        let raw = self.bytes(n.checked_mul(4).ok_or_else(|| {
            IndexError::Format(format!("float array length {} overflows", n))
        })?)?;
        Ok(raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

//! Locally-adaptive vector quantization (Codec B) for reranking.
//!
//! Every vector is centered on the global mean of the training sample and
//! its residual is quantized to 8 bits with its own affine range:
//!
//! ```text
//! residual = vector - mean
//! bias     = min(residual)
//! scale    = (max(residual) - min(residual)) / 255
//! q[i]     = round((residual[i] - bias) / scale)
//! ```
//!
//! The per-component error is at most `scale / 2`, which makes these codes
//! far more faithful than PQ codes. They are only read for the final
//! rerank, never during traversal.
//!
//! Code layout (`code_size = 8 + dimension` bytes):
//!
//! ```text
//! [bias: f32] [scale: f32] [q: u8; dimension]
//! ```

use crate::error::{IndexError, Result};
use crate::format::{self, FORMAT_VERSION, LVQ_MAGIC};
use coherepedia_vector::{validate_vector, VectorSimilarity};
use std::path::Path;

const LEVELS: f32 = 255.0;

/// Global Codec B parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LvqQuantizer {
    mean: Vec<f32>,
}

/// A single Codec B code.
#[derive(Debug, Clone, PartialEq)]
pub struct LvqCode {
    pub bias: f32,
    pub scale: f32,
    pub components: Vec<u8>,
}

impl LvqCode {
    /// Serialize as `bias | scale | components`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.components.len());
        out.extend_from_slice(&self.bias.to_le_bytes());
        out.extend_from_slice(&self.scale.to_le_bytes());
        out.extend_from_slice(&self.components);
        out
    }

    /// Parse a code previously written by [`LvqCode::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(IndexError::Quantization(format!(
                "lvq code too short: {} bytes",
                bytes.len()
            )));
        }
        let (bias, scale) = code_header(bytes);
        Ok(Self {
            bias,
            scale,
            components: bytes[8..].to_vec(),
        })
    }
}

impl LvqQuantizer {
    /// Compute the global mean of the sample.
    pub fn train(vectors: &[Vec<f32>]) -> Result<Self> {
        let first = vectors.first().ok_or_else(|| {
            IndexError::Quantization("cannot train on an empty sample".to_string())
        })?;
        let dimension = first.len();
        if dimension == 0 {
            return Err(IndexError::Quantization(
                "cannot train on zero-dimensional vectors".to_string(),
            ));
        }

        let mut sum = vec![0.0f64; dimension];
        for v in vectors {
            validate_vector(v, dimension)?;
            for (s, &x) in sum.iter_mut().zip(v.iter()) {
                *s += x as f64;
            }
        }

        let n = vectors.len() as f64;
        let mean = sum.into_iter().map(|s| (s / n) as f32).collect();
        Ok(Self { mean })
    }

    /// Quantizer with an explicit mean (all zeros disables centering).
    pub fn from_mean(mean: Vec<f32>) -> Self {
        Self { mean }
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        8 + self.mean.len()
    }

    /// Quantize a vector.
    pub fn encode(&self, vector: &[f32]) -> Result<LvqCode> {
        validate_vector(vector, self.dimension())?;

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for (&x, &m) in vector.iter().zip(self.mean.iter()) {
            let r = x - m;
            min = min.min(r);
            max = max.max(r);
        }

        let bias = min;
        let scale = (max - min) / LEVELS;
        let components = vector
            .iter()
            .zip(self.mean.iter())
            .map(|(&x, &m)| {
                if scale > 0.0 {
                    ((x - m - bias) / scale).round().clamp(0.0, LEVELS) as u8
                } else {
                    0
                }
            })
            .collect();

        Ok(LvqCode {
            bias,
            scale,
            components,
        })
    }

    /// Reconstruct `mean + bias + scale * q`.
    pub fn decode(&self, code: &LvqCode) -> Result<Vec<f32>> {
        if code.components.len() != self.dimension() {
            return Err(IndexError::dimension_mismatch(
                self.dimension(),
                code.components.len(),
            ));
        }
        Ok(self
            .mean
            .iter()
            .zip(code.components.iter())
            .map(|(&m, &q)| m + code.bias + code.scale * q as f32)
            .collect())
    }

    /// Build a rerank scorer for one query.
    pub fn score_function_for<'a>(
        &'a self,
        query: &'a [f32],
        similarity: VectorSimilarity,
    ) -> Result<LvqScoreFunction<'a>> {
        validate_vector(query, self.dimension())?;
        let query_norm = coherepedia_vector::dot_product(query, query);
        Ok(LvqScoreFunction {
            lvq: self,
            query,
            similarity,
            query_norm,
        })
    }

    /// Serialize the global parameters.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(20 + 4 * self.mean.len());
        bytes.extend_from_slice(&LVQ_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.mean.len() as u32).to_le_bytes());
        for &m in &self.mean {
            bytes.extend_from_slice(&m.to_le_bytes());
        }
        format::seal(&mut bytes);
        bytes
    }

    /// Deserialize the global parameters.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = format::unseal(bytes)?;
        let mut r = format::preamble(body, LVQ_MAGIC, "lvq parameters")?;
        let dimension = r.u32()? as usize;
        let mean = r.f32_vec(dimension)?;
        if dimension == 0 || !r.is_empty() {
            return Err(IndexError::Format(format!(
                "lvq parameters: bad length for dimension {}",
                dimension
            )));
        }
        Ok(Self { mean })
    }

    /// Write the parameters to their cache file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Read parameters from their cache file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// Rerank scorer over raw Codec B code bytes.
///
/// Reconstructs components on the fly in a single pass; nothing is
/// allocated per scored code.
pub struct LvqScoreFunction<'a> {
    lvq: &'a LvqQuantizer,
    query: &'a [f32],
    similarity: VectorSimilarity,
    query_norm: f32,
}

impl LvqScoreFunction<'_> {
    /// Similarity between the query and the vector `code` encodes.
    ///
    /// A malformed code (wrong length) scores 0.0, the worst possible score.
    pub fn score(&self, code: &[u8]) -> f32 {
        if code.len() != self.lvq.code_size() {
            return 0.0;
        }
        let (bias, scale) = code_header(code);

        let mut dist = 0.0f32;
        let mut dot = 0.0f32;
        let mut norm = 0.0f32;
        for ((&q, &m), &x) in code[8..]
            .iter()
            .zip(self.lvq.mean.iter())
            .zip(self.query.iter())
        {
            let v = m + bias + scale * q as f32;
            match self.similarity {
                VectorSimilarity::Euclidean => {
                    let d = x - v;
                    dist += d * d;
                }
                VectorSimilarity::DotProduct => dot += x * v,
                VectorSimilarity::Cosine => {
                    dot += x * v;
                    norm += v * v;
                }
            }
        }

        match self.similarity {
            VectorSimilarity::Euclidean => VectorSimilarity::from_squared_distance(dist),
            VectorSimilarity::DotProduct => VectorSimilarity::from_dot(dot),
            VectorSimilarity::Cosine => {
                let denom = (self.query_norm * norm).sqrt();
                if denom < f32::EPSILON {
                    VectorSimilarity::from_cosine(0.0)
                } else {
                    VectorSimilarity::from_cosine(dot / denom)
                }
            }
        }
    }
}

#[inline]
fn code_header(code: &[u8]) -> (f32, f32) {
    let bias = f32::from_le_bytes([code[0], code[1], code[2], code[3]]);
    let scale = f32::from_le_bytes([code[4], code[5], code[6], code[7]]);
    (bias, scale)
}

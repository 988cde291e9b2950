//! Product Quantization (Codec A) for graph traversal.
//!
//! Product Quantization (PQ) compresses high-dimensional vectors into compact
//! codes while enabling fast approximate scoring.
//!
//! # How It Works
//!
//! 1. **Split**: Divide vector into M subspaces (e.g., 1024D → 64 x 16D)
//! 2. **Cluster**: K-means on each subspace to find K centroids (at most 256)
//! 3. **Encode**: Each subvector → nearest centroid ID (one byte)
//! 4. **Score**: Precompute query-to-centroid partials, lookup by code
//!
//! # Compression Ratio
//!
//! For 1024D float32 vectors with M=64 subspaces, K=256 centroids:
//! - Original: 1024 * 4 = 4096 bytes
//! - Compressed: 64 * 1 = 64 bytes
//! - Ratio: 64x
//!
//! Training is deterministic for a fixed [`PqConfig::seed`]: every subspace
//! draws from its own `StdRng` seeded from it, so the rayon schedule does not
//! affect the result.

use crate::config::PqConfig;
use crate::error::{IndexError, Result};
use crate::format::{self, FORMAT_VERSION, PQ_MAGIC};
use coherepedia_vector::{dot_product, squared_euclidean, VectorSimilarity};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;

/// Product Quantizer.
///
/// Immutable once trained. Codebooks are stored flat:
/// `centroids[(subspace * num_centroids + centroid) * subspace_dim ..]`.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    /// Total vector dimensions
    dimensions: usize,

    /// Number of subspaces (M)
    num_subspaces: usize,

    /// Dimension of each subspace
    subspace_dim: usize,

    /// Number of centroids per subspace (K)
    num_centroids: usize,

    /// Flat codebook, shape [M][K][subspace_dim]
    centroids: Vec<f32>,

    /// Squared norm of every centroid, shape [M][K]; used for cosine
    centroid_norms: Vec<f32>,

    /// Per-subspace max squared distance from a training subvector to its
    /// nearest centroid
    max_distortion: Vec<f32>,
}

impl ProductQuantizer {
    /// Train a Product Quantizer on a sample of vectors.
    ///
    /// # Arguments
    ///
    /// * `vectors` - Training vectors
    /// * `dimensions` - Vector dimensions
    /// * `config` - PQ configuration
    pub fn train(vectors: &[Vec<f32>], dimensions: usize, config: &PqConfig) -> Result<Self> {
        let num_subspaces = config.subspaces_for(dimensions);
        let num_centroids = config.num_centroids;

        if num_subspaces == 0 || dimensions % num_subspaces != 0 {
            return Err(IndexError::Quantization(format!(
                "Dimensions {} not divisible by num_subspaces {}",
                dimensions, num_subspaces
            )));
        }
        if num_centroids == 0 || num_centroids > 256 {
            return Err(IndexError::Quantization(format!(
                "num_centroids must be in 1..=256, got {}",
                num_centroids
            )));
        }
        if vectors.is_empty() {
            return Err(IndexError::Quantization(
                "cannot train on an empty sample".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(IndexError::dimension_mismatch(dimensions, bad.len()));
        }

        let subspace_dim = dimensions / num_subspaces;

        // Sample training vectors if needed
        let training_vectors: Vec<&[f32]> = if vectors.len() > config.training_sample_size {
            let mut rng = StdRng::seed_from_u64(config.seed);
            let mut indices: Vec<_> = (0..vectors.len()).collect();
            indices.shuffle(&mut rng);
            indices
                .into_iter()
                .take(config.training_sample_size)
                .map(|i| vectors[i].as_slice())
                .collect()
        } else {
            vectors.iter().map(|v| v.as_slice()).collect()
        };

        // Train each subspace independently
        let trained: Vec<(Vec<f32>, f32)> = (0..num_subspaces)
            .into_par_iter()
            .map(|subspace_idx| {
                let start = subspace_idx * subspace_dim;
                let end = start + subspace_dim;

                let subvectors: Vec<&[f32]> =
                    training_vectors.iter().map(|v| &v[start..end]).collect();

                let mut rng =
                    StdRng::seed_from_u64(config.seed.wrapping_add(subspace_idx as u64 + 1));
                kmeans(
                    &subvectors,
                    subspace_dim,
                    num_centroids,
                    config.kmeans_iterations,
                    &mut rng,
                )
            })
            .collect();

        let mut centroids = Vec::with_capacity(num_subspaces * num_centroids * subspace_dim);
        let mut max_distortion = Vec::with_capacity(num_subspaces);
        for (codebook, distortion) in trained {
            centroids.extend_from_slice(&codebook);
            max_distortion.push(distortion);
        }

        Ok(Self::from_parts(
            dimensions,
            num_subspaces,
            num_centroids,
            centroids,
            max_distortion,
        ))
    }

    fn from_parts(
        dimensions: usize,
        num_subspaces: usize,
        num_centroids: usize,
        centroids: Vec<f32>,
        max_distortion: Vec<f32>,
    ) -> Self {
        let subspace_dim = dimensions / num_subspaces;
        let centroid_norms = centroids
            .chunks_exact(subspace_dim)
            .map(|c| dot_product(c, c))
            .collect();

        Self {
            dimensions,
            num_subspaces,
            subspace_dim,
            num_centroids,
            centroids,
            centroid_norms,
            max_distortion,
        }
    }

    /// Encode a vector to PQ codes, one centroid index per subspace.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.dimensions {
            return Err(IndexError::dimension_mismatch(self.dimensions, vector.len()));
        }

        let codes = (0..self.num_subspaces)
            .map(|subspace_idx| {
                let subvector = self.subvector(vector, subspace_idx);
                self.find_nearest_centroid(subspace_idx, subvector).0 as u8
            })
            .collect();

        Ok(codes)
    }

    /// Reconstruct the (lossy) vector a code stands for.
    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        self.check_code(code)?;

        let mut out = Vec::with_capacity(self.dimensions);
        for (subspace_idx, &c) in code.iter().enumerate() {
            out.extend_from_slice(self.centroid(subspace_idx, c as usize));
        }
        Ok(out)
    }

    /// Build the per-query lookup tables for scoring stored codes.
    pub fn score_function_for(
        &self,
        query: &[f32],
        similarity: VectorSimilarity,
    ) -> Result<PqScoreFunction<'_>> {
        if query.len() != self.dimensions {
            return Err(IndexError::dimension_mismatch(self.dimensions, query.len()));
        }

        let mut table = Vec::with_capacity(self.num_subspaces * self.num_centroids);
        for subspace_idx in 0..self.num_subspaces {
            let q = self.subvector(query, subspace_idx);
            for centroid_idx in 0..self.num_centroids {
                let c = self.centroid(subspace_idx, centroid_idx);
                table.push(match similarity {
                    VectorSimilarity::Euclidean => squared_euclidean(q, c),
                    VectorSimilarity::DotProduct | VectorSimilarity::Cosine => dot_product(q, c),
                });
            }
        }

        Ok(PqScoreFunction {
            pq: self,
            similarity,
            table,
            query_norm: dot_product(query, query),
        })
    }

    /// Similarity between the vectors two codes stand for.
    ///
    /// Equivalent to decoding both codes and comparing them, without the
    /// allocation.
    pub fn code_similarity(&self, similarity: VectorSimilarity, a: &[u8], b: &[u8]) -> f32 {
        debug_assert_eq!(a.len(), self.num_subspaces);
        debug_assert_eq!(b.len(), self.num_subspaces);

        let mut acc = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (subspace_idx, (&ca, &cb)) in a.iter().zip(b.iter()).enumerate() {
            let x = self.centroid(subspace_idx, ca as usize);
            let y = self.centroid(subspace_idx, cb as usize);
            match similarity {
                VectorSimilarity::Euclidean => acc += squared_euclidean(x, y),
                VectorSimilarity::DotProduct => acc += dot_product(x, y),
                VectorSimilarity::Cosine => {
                    acc += dot_product(x, y);
                    norm_a += self.centroid_norm(subspace_idx, ca as usize);
                    norm_b += self.centroid_norm(subspace_idx, cb as usize);
                }
            }
        }

        match similarity {
            VectorSimilarity::Euclidean => VectorSimilarity::from_squared_distance(acc),
            VectorSimilarity::DotProduct => VectorSimilarity::from_dot(acc),
            VectorSimilarity::Cosine => cosine_from_parts(acc, norm_a, norm_b),
        }
    }

    /// Per-subspace maximum training distortion (squared distance).
    pub fn max_distortion(&self) -> &[f32] {
        &self.max_distortion
    }

    /// Upper bound on the squared reconstruction error of any training
    /// vector: the sum of the per-subspace maxima.
    pub fn distortion_bound(&self) -> f32 {
        self.max_distortion.iter().sum()
    }

    /// Get the number of subspaces.
    pub fn num_subspaces(&self) -> usize {
        self.num_subspaces
    }

    /// Get the number of centroids per subspace.
    pub fn num_centroids(&self) -> usize {
        self.num_centroids
    }

    /// Get the total dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Bytes per code.
    pub fn code_size(&self) -> usize {
        self.num_subspaces
    }

    /// Serialize the PQ codebook to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32 + 4 * (self.centroids.len() + self.num_subspaces));

        // Header
        bytes.extend_from_slice(&PQ_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.num_subspaces as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.num_centroids as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.subspace_dim as u32).to_le_bytes());

        for &d in &self.max_distortion {
            bytes.extend_from_slice(&d.to_le_bytes());
        }
        for &val in &self.centroids {
            bytes.extend_from_slice(&val.to_le_bytes());
        }

        format::seal(&mut bytes);
        bytes
    }

    /// Deserialize PQ codebook from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = format::unseal(bytes)?;
        let mut r = format::preamble(body, PQ_MAGIC, "pq codebook")?;

        let dimensions = r.u32()? as usize;
        let num_subspaces = r.u32()? as usize;
        let num_centroids = r.u32()? as usize;
        let subspace_dim = r.u32()? as usize;

        if num_subspaces == 0
            || num_centroids == 0
            || num_centroids > 256
            || num_subspaces * subspace_dim != dimensions
        {
            return Err(IndexError::Format(format!(
                "pq codebook: inconsistent shape {}x{}x{} for dimension {}",
                num_subspaces, num_centroids, subspace_dim, dimensions
            )));
        }

        let max_distortion = r.f32_vec(num_subspaces)?;
        let centroids = r.f32_vec(num_subspaces * num_centroids * subspace_dim)?;
        if !r.is_empty() {
            return Err(IndexError::Format(
                "pq codebook: trailing bytes".to_string(),
            ));
        }

        Ok(Self::from_parts(
            dimensions,
            num_subspaces,
            num_centroids,
            centroids,
            max_distortion,
        ))
    }

    /// Write the codebook to its cache file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Read a codebook from its cache file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub(crate) fn check_code(&self, code: &[u8]) -> Result<()> {
        if code.len() != self.num_subspaces {
            return Err(IndexError::Quantization(format!(
                "code length {} does not match {} subspaces",
                code.len(),
                self.num_subspaces
            )));
        }
        if let Some(&bad) = code.iter().find(|&&c| c as usize >= self.num_centroids) {
            return Err(IndexError::Quantization(format!(
                "centroid index {} out of range (K = {})",
                bad, self.num_centroids
            )));
        }
        Ok(())
    }

    #[inline]
    fn subvector<'v>(&self, vector: &'v [f32], subspace_idx: usize) -> &'v [f32] {
        let start = subspace_idx * self.subspace_dim;
        &vector[start..start + self.subspace_dim]
    }

    #[inline]
    fn centroid(&self, subspace_idx: usize, centroid_idx: usize) -> &[f32] {
        let start = (subspace_idx * self.num_centroids + centroid_idx) * self.subspace_dim;
        &self.centroids[start..start + self.subspace_dim]
    }

    #[inline]
    fn centroid_norm(&self, subspace_idx: usize, centroid_idx: usize) -> f32 {
        self.centroid_norms[subspace_idx * self.num_centroids + centroid_idx]
    }

    /// Find the nearest centroid in a subspace, returning (index, squared distance).
    fn find_nearest_centroid(&self, subspace_idx: usize, subvector: &[f32]) -> (usize, f32) {
        let start = subspace_idx * self.num_centroids * self.subspace_dim;
        let end = start + self.num_centroids * self.subspace_dim;
        nearest(&self.centroids[start..end], self.subspace_dim, subvector)
    }
}

/// Query-specific scorer over PQ codes.
///
/// Scoring a code is M table lookups instead of a pass over the full
/// dimension.
pub struct PqScoreFunction<'a> {
    pq: &'a ProductQuantizer,
    similarity: VectorSimilarity,
    /// Partial squared distances or partial dot products, shape [M][K]
    table: Vec<f32>,
    /// Squared norm of the full query
    query_norm: f32,
}

impl PqScoreFunction<'_> {
    /// Approximate similarity between the query and a stored code.
    #[inline]
    pub fn score(&self, code: &[u8]) -> f32 {
        let k = self.pq.num_centroids;
        let mut acc = 0.0f32;
        let mut norm = 0.0f32;

        for (subspace_idx, &c) in code.iter().enumerate() {
            acc += self.table[subspace_idx * k + c as usize];
            if self.similarity == VectorSimilarity::Cosine {
                norm += self.pq.centroid_norm(subspace_idx, c as usize);
            }
        }

        match self.similarity {
            VectorSimilarity::Euclidean => VectorSimilarity::from_squared_distance(acc),
            VectorSimilarity::DotProduct => VectorSimilarity::from_dot(acc),
            VectorSimilarity::Cosine => cosine_from_parts(acc, self.query_norm, norm),
        }
    }
}

#[inline]
fn cosine_from_parts(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    let denom = (norm_a * norm_b).sqrt();
    if denom < f32::EPSILON {
        return VectorSimilarity::from_cosine(0.0);
    }
    VectorSimilarity::from_cosine(dot / denom)
}

/// Nearest centroid in a flat `[K][dim]` table.
fn nearest(centroids: &[f32], dim: usize, point: &[f32]) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_dist = f32::MAX;

    for (idx, centroid) in centroids.chunks_exact(dim).enumerate() {
        let dist = squared_euclidean(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }

    (best_idx, best_dist)
}

/// Seeded k-means (Lloyd's algorithm).
///
/// Returns the flat `[k][dim]` codebook and the largest squared distance
/// from any point to its nearest final centroid.
fn kmeans(
    points: &[&[f32]],
    dim: usize,
    k: usize,
    iterations: usize,
    rng: &mut StdRng,
) -> (Vec<f32>, f32) {
    // Initialize centroids from distinct random points, cycling through the
    // sample again if it is smaller than k
    let mut indices: Vec<_> = (0..points.len()).collect();
    indices.shuffle(rng);

    let mut centroids = Vec::with_capacity(k * dim);
    for i in 0..k {
        centroids.extend_from_slice(points[indices[i % indices.len()]]);
    }

    let mut sums = vec![0.0f32; k * dim];
    let mut counts = vec![0usize; k];

    for _ in 0..iterations {
        sums.iter_mut().for_each(|s| *s = 0.0);
        counts.iter_mut().for_each(|c| *c = 0);

        // Assign points to nearest centroid
        for point in points {
            let (best, _) = nearest(&centroids, dim, point);
            counts[best] += 1;
            for (s, &v) in sums[best * dim..(best + 1) * dim].iter_mut().zip(point.iter()) {
                *s += v;
            }
        }

        // Update centroids; empty clusters keep their position
        let mut moved = false;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let count = counts[c] as f32;
            for d in 0..dim {
                let updated = sums[c * dim + d] / count;
                if updated != centroids[c * dim + d] {
                    moved = true;
                }
                centroids[c * dim + d] = updated;
            }
        }

        if !moved {
            break;
        }
    }

    let max_distortion = points
        .iter()
        .map(|p| nearest(&centroids, dim, p).1)
        .fold(0.0f32, f32::max);

    (centroids, max_distortion)
}

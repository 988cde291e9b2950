//! Similarity functions.
//!
//! Three metrics are supported, each normalized to a non-negative score
//! where higher = more similar:
//! - **Euclidean**: `1 / (1 + ‖a − b‖²)`
//! - **DotProduct**: `(1 + a · b) / 2`, meant for unit-length embeddings
//! - **Cosine**: `(1 + cos(a, b)) / 2`
//!
//! Scores are never negative; the graph builder's diversity rule scales
//! them by `alpha` and relies on that.
//!
//! The raw kernels are written in chunks of 4 so that release builds
//! auto-vectorize them.

use serde::{Deserialize, Serialize};

/// Similarity function enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSimilarity {
    /// `1 / (1 + squared L2 distance)`
    Euclidean,
    /// `(1 + dot) / 2`
    DotProduct,
    /// `(1 + cosine) / 2`
    Cosine,
}

impl VectorSimilarity {
    /// Compute the similarity between two vectors.
    #[inline]
    pub fn compare(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Euclidean => Self::from_squared_distance(squared_euclidean(a, b)),
            Self::DotProduct => Self::from_dot(dot_product(a, b)),
            Self::Cosine => Self::from_cosine(cosine(a, b)),
        }
    }

    /// Map a squared L2 distance to a Euclidean similarity.
    #[inline]
    pub fn from_squared_distance(d2: f32) -> f32 {
        1.0 / (1.0 + d2.max(0.0))
    }

    /// Map a raw dot product to a dot-product similarity.
    #[inline]
    pub fn from_dot(dot: f32) -> f32 {
        (1.0 + dot) / 2.0
    }

    /// Map a cosine in `[-1, 1]` to a cosine similarity.
    #[inline]
    pub fn from_cosine(cos: f32) -> f32 {
        (1.0 + cos.clamp(-1.0, 1.0)) / 2.0
    }

    /// Stable one-byte tag used in file headers.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Euclidean => 0,
            Self::DotProduct => 1,
            Self::Cosine => 2,
        }
    }

    /// Inverse of [`VectorSimilarity::to_u8`].
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Euclidean),
            1 => Some(Self::DotProduct),
            2 => Some(Self::Cosine),
            _ => None,
        }
    }
}

/// Squared Euclidean distance.
///
/// # Example
///
/// ```
/// use coherepedia_vector::squared_euclidean;
///
/// assert!((squared_euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < 1e-6);
/// ```
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }

    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }

    sum
}

/// Dot product.
///
/// # Example
///
/// ```
/// use coherepedia_vector::dot_product;
///
/// assert!((dot_product(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]) - 32.0).abs() < 1e-6);
/// ```
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        sum += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];
    }

    for i in (chunks * 4)..a.len() {
        sum += a[i] * b[i];
    }

    sum
}

/// Cosine of the angle between two vectors, in `[-1, 1]`.
///
/// Zero vectors have no direction; they are treated as orthogonal (0.0).
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let (dot, norm_a, norm_b) = dot_and_norms(a, b);

    let denom = (norm_a * norm_b).sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = dot_product(v, v).sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Dot product and squared norms in a single pass.
///
/// Returns (dot, norm_a_squared, norm_b_squared)
#[inline]
fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;

        dot += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];

        norm_a += a[base] * a[base]
            + a[base + 1] * a[base + 1]
            + a[base + 2] * a[base + 2]
            + a[base + 3] * a[base + 3];

        norm_b += b[base] * b[base]
            + b[base + 1] * b[base + 1]
            + b[base + 2] * b[base + 2]
            + b[base + 3] * b[base + 3];
    }

    for i in (chunks * 4)..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    (dot, norm_a, norm_b)
}

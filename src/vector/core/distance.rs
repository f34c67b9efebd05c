//! Distance metrics for vector similarity calculation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VicinityError};
use crate::util::simd::{dot_product_simd, squared_l2_simd, squared_norm_simd};

/// Added to the norm before dividing so near-zero vectors stay finite.
pub const NORMALIZATION_EPSILON: f32 = 1e-30;

/// Distance metrics for vector similarity calculation.
///
/// Smaller distances always mean "more similar":
/// - `Euclidean` is the squared L2 distance,
/// - `InnerProduct` is `1 - <a, b>`,
/// - `Cosine` is `1 - <a, b>` over unit-normalized vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean (L2) distance
    #[default]
    Euclidean,
    /// Inner product distance (1 - dot product)
    InnerProduct,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
}

impl DistanceMetric {
    /// Calculate the distance between two vectors using this metric.
    ///
    /// Cosine distance assumes both inputs are already unit-normalized, which
    /// [`MetricSpace`] guarantees for stored and query vectors.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => squared_l2_simd(a, b),
            DistanceMetric::InnerProduct | DistanceMetric::Cosine => {
                1.0 - dot_product_simd(a, b)
            }
        }
    }

    /// Whether vectors must be unit-normalized before distances are computed.
    pub fn requires_normalization(&self) -> bool {
        matches!(self, DistanceMetric::Cosine)
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::InnerProduct => "inner_product",
            DistanceMetric::Cosine => "cosine",
        }
    }

    /// Parse a distance metric from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "inner_product" | "ip" | "dot" => Ok(DistanceMetric::InnerProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            _ => Err(VicinityError::invalid_argument(format!(
                "Unknown distance metric: {s}"
            ))),
        }
    }

    /// Stable one-byte code used by the persisted index header.
    pub fn code(&self) -> u8 {
        match self {
            DistanceMetric::Euclidean => 0,
            DistanceMetric::InnerProduct => 1,
            DistanceMetric::Cosine => 2,
        }
    }

    /// Inverse of [`DistanceMetric::code`].
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DistanceMetric::Euclidean),
            1 => Ok(DistanceMetric::InnerProduct),
            2 => Ok(DistanceMetric::Cosine),
            other => Err(VicinityError::corrupt(format!(
                "Unknown distance metric code: {other}"
            ))),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scale `vector` in place to unit length.
pub fn normalize(vector: &mut [f32]) {
    let inv = 1.0 / (squared_norm_simd(vector).sqrt() + NORMALIZATION_EPSILON);
    for value in vector.iter_mut() {
        *value *= inv;
    }
}

/// A distance metric bound to a fixed dimension.
///
/// Owned by each index for its whole lifetime and read-only after
/// construction, so it is shared freely across worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpace {
    metric: DistanceMetric,
    dimension: usize,
}

impl MetricSpace {
    /// Create a metric space; fails if `dimension` is zero.
    pub fn new(metric: DistanceMetric, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(VicinityError::invalid_argument("Dimension must be > 0"));
        }
        Ok(Self { metric, dimension })
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether inserted and query vectors are normalized.
    pub fn normalizes(&self) -> bool {
        self.metric.requires_normalization()
    }

    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.metric.distance(a, b)
    }

    /// Fail with `InvalidArgument` unless `len` equals the space dimension.
    pub fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(VicinityError::invalid_argument(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dimension, len
            )));
        }
        Ok(())
    }

    /// Copy `src` into `dst`, normalizing when the metric requires it.
    ///
    /// `dst` is cleared first so callers can reuse one buffer per worker.
    pub fn prepare_into(&self, src: &[f32], dst: &mut Vec<f32>) {
        dst.clear();
        dst.extend_from_slice(src);
        if self.normalizes() {
            normalize(dst);
        }
    }

    /// Owned copy of `src`, normalized when the metric requires it.
    pub fn prepare(&self, src: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(src.len());
        self.prepare_into(src, &mut out);
        out
    }
}

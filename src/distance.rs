//! Distance metrics for vector similarity.
//!
//! Scalar reference implementations live here; [`crate::simd`] provides
//! vectorized kernels with the same contracts, selected once at runtime.

use serde::{Deserialize, Serialize};

/// A distance kind over fixed-dimension float vectors.
///
/// `DotProduct` is negated so that, like the other three kinds, smaller
/// means more similar across the whole enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceKind {
    Euclidean,
    Cosine,
    DotProduct,
    Manhattan,
}

impl Default for DistanceKind {
    fn default() -> Self {
        Self::Euclidean
    }
}

/// Sentinel distance returned on dimension mismatch or non-finite input.
///
/// Callers treat this as "skip": it sorts last in ascending-distance result
/// sets and is never mistaken for a real minimum.
pub const SENTINEL_DISTANCE: f32 = f32::INFINITY;

impl DistanceKind {
    /// Computes the distance between `a` and `b`, dispatching to the
    /// runtime-selected SIMD kernel when available.
    ///
    /// Returns [`SENTINEL_DISTANCE`] if `a.len() != b.len()` rather than
    /// panicking: a distance evaluation never suspends and never allocates,
    /// and must not unwind through an index's inner scan loop.
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return SENTINEL_DISTANCE;
        }
        crate::simd::dispatch(*self, a, b)
    }

    /// Scalar reference implementation. SIMD kernels must match this within
    /// 1 ulp per accumulated term.
    #[must_use]
    pub fn distance_scalar(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return SENTINEL_DISTANCE;
        }
        match self {
            Self::Euclidean => euclidean_scalar(a, b),
            Self::Cosine => cosine_scalar(a, b),
            Self::DotProduct => dot_scalar(a, b),
            Self::Manhattan => manhattan_scalar(a, b),
        }
    }

    /// Upper bound of the metric's range, used by callers that need to seed
    /// a "worse than anything" value (e.g. empty max-heap sentinels).
    #[must_use]
    pub const fn worst_case(&self) -> f32 {
        match self {
            Self::Cosine => 2.0,
            Self::Euclidean | Self::DotProduct | Self::Manhattan => f32::INFINITY,
        }
    }
}

pub(crate) fn euclidean_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub(crate) fn cosine_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0; // "far": undefined direction treated as maximally distant.
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub(crate) fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    -dot
}

pub(crate) fn manhattan_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

//! Vector payloads, metadata, and search result shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A string-keyed, string-valued metadata mapping attached to a vector.
///
/// Keys are unique per vector; insertion order is not preserved (the spec
/// marks it irrelevant), so a `BTreeMap` gives deterministic iteration for
/// snapshot serialization for free.
pub type Metadata = BTreeMap<String, String>;

/// The payload stored in one slot: a dense float vector or a sparse one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    /// `dimension` contiguous 32-bit floats.
    Dense(Vec<f32>),
    /// Sorted `(index, value)` pairs plus a logical dimension. Indices must
    /// be strictly increasing and `< dimension`.
    Sparse {
        dimension: usize,
        entries: Vec<(u32, f32)>,
    },
}

impl Vector {
    /// The logical dimension of this vector, dense or sparse.
    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Dense(v) => v.len(),
            Self::Sparse { dimension, .. } => *dimension,
        }
    }

    /// Materializes a dense `Vec<f32>` of length `dimension()`.
    ///
    /// Dense vectors are returned as-is (cloned); sparse vectors are
    /// expanded, zero-filling absent indices.
    #[must_use]
    pub fn to_dense(&self) -> Vec<f32> {
        match self {
            Self::Dense(v) => v.clone(),
            Self::Sparse { dimension, entries } => {
                let mut out = vec![0.0f32; *dimension];
                for &(idx, val) in entries {
                    if (idx as usize) < *dimension {
                        out[idx as usize] = val;
                    }
                }
                out
            }
        }
    }

    /// True if this is a `Sparse` variant with non-increasing or
    /// out-of-range indices.
    #[must_use]
    pub fn is_malformed_sparse(&self) -> bool {
        if let Self::Sparse { dimension, entries } = self {
            let mut prev: Option<u32> = None;
            for &(idx, _) in entries {
                if idx as usize >= *dimension {
                    return true;
                }
                if let Some(p) = prev {
                    if idx <= p {
                        return true;
                    }
                }
                prev = Some(idx);
            }
            false
        } else {
            false
        }
    }
}

/// One entry in a ranked result set.
///
/// Borrows nothing: the engine's locking model only guarantees the
/// underlying slot is stable for the duration of a call, so results are
/// owned copies the caller may retain past the next mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub slot_id: u64,
    pub distance: f32,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl Eq for SearchResult {}

impl PartialOrd for SearchResult {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchResult {
    /// Ascending distance, ties broken by ascending slot ID — matches the
    /// determinism guarantee in the concurrency model.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.slot_id.cmp(&other.slot_id))
    }
}

//! Zero-copy guard for vector data retrieved from the store.
//!
//! Grounded in the teacher's `storage/guard.rs`: a plain borrow would tie
//! the guard's lifetime to `&VectorStore`, which is sufficient for the
//! in-memory backing but would be unsound for the mmap backing across a
//! remap. The epoch counter closes that gap for both.

use std::sync::atomic::{AtomicU64, Ordering};

/// A borrowed view of one slot's vector payload.
///
/// Validates on every access that the store has not grown (and thus
/// possibly remapped or reallocated) since the guard was created.
pub struct VectorSliceGuard<'a> {
    slice: &'a [f32],
    epoch: &'a AtomicU64,
    epoch_at_creation: u64,
}

impl<'a> VectorSliceGuard<'a> {
    pub(super) fn new(slice: &'a [f32], epoch: &'a AtomicU64) -> Self {
        let epoch_at_creation = epoch.load(Ordering::Acquire);
        Self {
            slice,
            epoch,
            epoch_at_creation,
        }
    }

    /// Returns the vector data as a slice.
    ///
    /// # Panics
    ///
    /// Panics if the store grew (and thus reallocated/remapped) since this
    /// guard was created — that indicates a guard held across a mutation,
    /// which the ownership model in the spec disallows.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        let current = self.epoch.load(Ordering::Acquire);
        assert!(
            current == self.epoch_at_creation,
            "VectorSliceGuard used after the store grew; guards must not outlive a mutation"
        );
        self.slice
    }
}

impl AsRef<[f32]> for VectorSliceGuard<'_> {
    fn as_ref(&self) -> &[f32] {
        self.as_slice()
    }
}

impl std::ops::Deref for VectorSliceGuard<'_> {
    type Target = [f32];
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

//! Vector store: structure-of-arrays vector payload, metadata chain, and
//! tombstone bitmap.
//!
//! Grounded in the teacher's `storage/mmap.rs` (capacity-doubling growth,
//! `ensure_capacity`) and `storage/guard.rs` (epoch-validated zero-copy
//! slice guard). The float buffer backing a store is either a plain `Vec`
//! or a memory-mapped file, selected at construction time and hidden behind
//! one API so every index backend works identically over either.

mod guard;
mod mmap_backing;

pub use guard::VectorSliceGuard;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::{GigaError, Result};
use crate::point::Metadata;

use mmap_backing::MmapBacking;

/// How the float buffer backing a [`VectorStore`] is held in memory.
enum Backing {
    Memory(Vec<f32>),
    Mmap(MmapBacking),
}

impl Backing {
    fn as_slice(&self) -> &[f32] {
        match self {
            Self::Memory(v) => v.as_slice(),
            Self::Mmap(m) => m.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [f32] {
        match self {
            Self::Memory(v) => v.as_mut_slice(),
            Self::Mmap(m) => m.as_mut_slice(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Memory(v) => v.len(),
            Self::Mmap(m) => m.len(),
        }
    }

    fn grow_to(&mut self, new_len_floats: usize) -> Result<()> {
        match self {
            Self::Memory(v) => {
                v.resize(new_len_floats, 0.0);
                Ok(())
            }
            Self::Mmap(m) => m.grow_to(new_len_floats),
        }
    }

    fn flush(&self) -> Result<()> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Mmap(m) => m.flush(),
        }
    }
}

/// One slot's worth of bookkeeping outside the float buffer.
struct SlotMeta {
    metadata: Metadata,
}

/// Structure-of-arrays vector store.
///
/// Owns the float payload buffer, one [`Metadata`] per slot, and a
/// [`RoaringBitmap`] tombstone set. Slot IDs are dense `u64`s assigned in
/// insertion order; growth doubles capacity and never moves existing data,
/// so IDs stay stable across growth (only `compact` renumbers).
pub struct VectorStore {
    dimension: usize,
    capacity: u64,
    high_water_mark: u64,
    max_vectors: Option<usize>,
    backing: Backing,
    slots: Vec<SlotMeta>,
    tombstones: RoaringBitmap,
    /// Bumped on every `grow_to`; invalidates outstanding
    /// [`VectorSliceGuard`]s so they cannot observe a stale pointer.
    epoch: AtomicU64,
}

const DEFAULT_INITIAL_CAPACITY: u64 = 1024;

impl VectorStore {
    /// Creates an in-memory store for `dimension`-sized vectors.
    #[must_use]
    pub fn new_in_memory(dimension: usize, max_vectors: Option<usize>) -> Self {
        Self::with_capacity(dimension, max_vectors, Backing::Memory(Vec::new()), 0)
    }

    /// Creates a memory-mapped store backed by `path`, growable in place.
    pub fn new_mmap(dimension: usize, max_vectors: Option<usize>, path: &Path) -> Result<Self> {
        let backing = MmapBacking::create(path, DEFAULT_INITIAL_CAPACITY as usize * dimension)?;
        Ok(Self::with_capacity(
            dimension,
            max_vectors,
            Backing::Mmap(backing),
            DEFAULT_INITIAL_CAPACITY,
        ))
    }

    fn with_capacity(
        dimension: usize,
        max_vectors: Option<usize>,
        mut backing: Backing,
        capacity: u64,
    ) -> Self {
        let capacity = capacity.max(DEFAULT_INITIAL_CAPACITY);
        if backing.len() < (capacity as usize) * dimension {
            // Best effort; in-memory backing never fails to grow.
            let _ = backing.grow_to(capacity as usize * dimension);
        }
        Self {
            dimension,
            capacity,
            high_water_mark: 0,
            max_vectors,
            backing,
            slots: Vec::new(),
            tombstones: RoaringBitmap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live (non-tombstoned) vectors.
    #[must_use]
    pub fn live_count(&self) -> u64 {
        self.high_water_mark - self.tombstones.len().min(self.high_water_mark)
    }

    /// True count of tombstoned slots below the high-water mark.
    #[must_use]
    pub fn tombstone_count(&self) -> u64 {
        self.tombstones.len()
    }

    #[must_use]
    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    #[must_use]
    pub fn is_tombstoned(&self, slot_id: u64) -> bool {
        slot_id <= u32::MAX as u64 && self.tombstones.contains(slot_id as u32)
    }

    /// Appends a new slot, returning its ID.
    pub fn add(&mut self, payload: &[f32], metadata: Metadata) -> Result<u64> {
        if payload.len() != self.dimension {
            return Err(GigaError::InvalidArgument(format!(
                "expected dimension {}, got {}",
                self.dimension,
                payload.len()
            )));
        }
        if let Some(max) = self.max_vectors {
            if (self.live_count() as usize) >= max {
                return Err(GigaError::CapacityExceeded(max));
            }
        }
        let slot_id = self.high_water_mark;
        self.ensure_capacity(slot_id + 1)?;
        let base = slot_id as usize * self.dimension;
        self.backing.as_mut_slice()[base..base + self.dimension].copy_from_slice(payload);
        self.slots.push(SlotMeta { metadata });
        self.high_water_mark += 1;
        Ok(slot_id)
    }

    /// Doubles capacity until `needed` slots fit.
    fn ensure_capacity(&mut self, needed: u64) -> Result<()> {
        if needed <= self.capacity {
            return Ok(());
        }
        let mut new_capacity = self.capacity.max(1);
        while new_capacity < needed {
            new_capacity *= 2;
        }
        let new_len = new_capacity as usize * self.dimension;
        self.backing
            .grow_to(new_len)
            .map_err(|e| GigaError::OutOfMemory(e.to_string()))?;
        self.capacity = new_capacity;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn check_live(&self, slot_id: u64) -> Result<()> {
        if slot_id >= self.high_water_mark {
            return Err(GigaError::NotFound(slot_id));
        }
        if self.is_tombstoned(slot_id) {
            return Err(GigaError::Deleted(slot_id));
        }
        Ok(())
    }

    /// Returns a copy of the vector payload at `slot_id`.
    pub fn get(&self, slot_id: u64) -> Result<Vec<f32>> {
        self.check_live(slot_id)?;
        let base = slot_id as usize * self.dimension;
        Ok(self.backing.as_slice()[base..base + self.dimension].to_vec())
    }

    /// Zero-copy view of the vector payload at `slot_id`.
    pub fn get_ref(&self, slot_id: u64) -> Result<VectorSliceGuard<'_>> {
        self.check_live(slot_id)?;
        let base = slot_id as usize * self.dimension;
        let slice = &self.backing.as_slice()[base..base + self.dimension];
        Ok(VectorSliceGuard::new(slice, &self.epoch))
    }

    #[must_use]
    pub fn get_metadata(&self, slot_id: u64) -> Option<&Metadata> {
        self.slots.get(slot_id as usize).map(|s| &s.metadata)
    }

    pub fn update_data(&mut self, slot_id: u64, payload: &[f32]) -> Result<()> {
        self.check_live(slot_id)?;
        if payload.len() != self.dimension {
            return Err(GigaError::InvalidArgument(format!(
                "expected dimension {}, got {}",
                self.dimension,
                payload.len()
            )));
        }
        let base = slot_id as usize * self.dimension;
        self.backing.as_mut_slice()[base..base + self.dimension].copy_from_slice(payload);
        Ok(())
    }

    pub fn update_metadata(&mut self, slot_id: u64, metadata: Metadata) -> Result<()> {
        self.check_live(slot_id)?;
        self.slots[slot_id as usize].metadata = metadata;
        Ok(())
    }

    /// Tombstones `slot_id`; storage is not freed until `compact`.
    pub fn delete(&mut self, slot_id: u64) -> Result<()> {
        self.check_live(slot_id)?;
        self.tombstones.insert(slot_id as u32);
        Ok(())
    }

    /// Shifts live slots forward, rebuilds the tombstone bitmap, and returns
    /// the `old_id -> new_id` mapping for the caller to rebuild the index.
    pub fn compact(&mut self) -> rustc_hash::FxHashMap<u64, u64> {
        let mut mapping = rustc_hash::FxHashMap::default();
        let mut write = 0u64;
        let mut new_slots = Vec::with_capacity(self.slots.len());
        for read in 0..self.high_water_mark {
            if self.is_tombstoned(read) {
                continue;
            }
            if read != write {
                let (src, dst) = (read as usize * self.dimension, write as usize * self.dimension);
                // SAFETY-free: non-overlapping shift via temp copy since src > dst always here.
                let tmp: Vec<f32> = self.backing.as_slice()[src..src + self.dimension].to_vec();
                self.backing.as_mut_slice()[dst..dst + self.dimension].copy_from_slice(&tmp);
            }
            new_slots.push(SlotMeta {
                metadata: std::mem::take(&mut self.slots[read as usize].metadata),
            });
            mapping.insert(read, write);
            write += 1;
        }
        self.slots = new_slots;
        self.high_water_mark = write;
        self.tombstones = RoaringBitmap::new();
        mapping
    }

    pub fn flush(&self) -> Result<()> {
        self.backing.flush()
    }

    /// Iterates all live slot IDs in ascending order.
    pub fn live_ids(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.high_water_mark).filter(move |id| !self.is_tombstoned(*id))
    }

    /// Produces an owned, serializable snapshot of every slot up to the
    /// high-water mark, for [`crate::snapshot`]. Always materializes into
    /// a plain `Vec<f32>` regardless of whether this store's live backing
    /// is in-memory or memory-mapped — the on-disk snapshot format does
    /// not distinguish the two.
    #[must_use]
    pub fn to_snapshot(&self) -> StoreSnapshot {
        let float_len = self.high_water_mark as usize * self.dimension;
        StoreSnapshot {
            dimension: self.dimension,
            max_vectors: self.max_vectors,
            high_water_mark: self.high_water_mark,
            floats: self.backing.as_slice()[..float_len].to_vec(),
            metadata: self.slots.iter().map(|s| s.metadata.clone()).collect(),
            tombstones: self.tombstones.clone(),
        }
    }

    /// Rebuilds an in-memory store from a [`StoreSnapshot`] produced by
    /// [`Self::to_snapshot`].
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut store = Self::with_capacity(
            snapshot.dimension,
            snapshot.max_vectors,
            Backing::Memory(snapshot.floats),
            snapshot.high_water_mark.max(DEFAULT_INITIAL_CAPACITY),
        );
        store.high_water_mark = snapshot.high_water_mark;
        store.slots = snapshot
            .metadata
            .into_iter()
            .map(|metadata| SlotMeta { metadata })
            .collect();
        store.tombstones = snapshot.tombstones;
        store
    }
}

/// Owned, serializable representation of a [`VectorStore`]'s live state —
/// the payload [`crate::snapshot`] writes after its header (spec.md §4.10).
#[derive(Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub dimension: usize,
    pub max_vectors: Option<usize>,
    pub high_water_mark: u64,
    pub floats: Vec<f32>,
    pub metadata: Vec<Metadata>,
    pub tombstones: RoaringBitmap,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Metadata {
        Metadata::new()
    }

    #[test]
    fn add_and_get_roundtrip() {
        let mut store = VectorStore::new_in_memory(3, None);
        let id = store.add(&[1.0, 2.0, 3.0], meta()).unwrap();
        assert_eq!(id, 0);
        assert_eq!(store.get(id).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut store = VectorStore::new_in_memory(3, None);
        let err = store.add(&[1.0, 2.0], meta()).unwrap_err();
        assert!(matches!(err, GigaError::InvalidArgument(_)));
    }

    #[test]
    fn get_past_high_water_mark_not_found() {
        let store = VectorStore::new_in_memory(3, None);
        assert!(matches!(store.get(0), Err(GigaError::NotFound(0))));
    }

    #[test]
    fn delete_then_get_is_deleted() {
        let mut store = VectorStore::new_in_memory(3, None);
        let id = store.add(&[1.0, 2.0, 3.0], meta()).unwrap();
        store.delete(id).unwrap();
        assert!(matches!(store.get(id), Err(GigaError::Deleted(_))));
    }

    #[test]
    fn capacity_exceeded() {
        let mut store = VectorStore::new_in_memory(1, Some(2));
        store.add(&[1.0], meta()).unwrap();
        store.add(&[2.0], meta()).unwrap();
        assert!(matches!(
            store.add(&[3.0], meta()),
            Err(GigaError::CapacityExceeded(2))
        ));
    }

    #[test]
    fn growth_doubles_capacity_and_preserves_ids() {
        let mut store = VectorStore::new_in_memory(1, None);
        let mut ids = Vec::new();
        for i in 0..5000 {
            ids.push(store.add(&[i as f32], meta()).unwrap());
        }
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(store.get(*id).unwrap(), vec![i as f32]);
        }
    }

    #[test]
    fn compact_renumbers_and_drops_tombstones() {
        let mut store = VectorStore::new_in_memory(1, None);
        let a = store.add(&[1.0], meta()).unwrap();
        let b = store.add(&[2.0], meta()).unwrap();
        let c = store.add(&[3.0], meta()).unwrap();
        store.delete(b).unwrap();
        let mapping = store.compact();
        assert_eq!(mapping.get(&a), Some(&0));
        assert_eq!(mapping.get(&c), Some(&1));
        assert!(!mapping.contains_key(&b));
        assert_eq!(store.live_count(), 2);
        assert_eq!(store.get(0).unwrap(), vec![1.0]);
        assert_eq!(store.get(1).unwrap(), vec![3.0]);
    }

    #[test]
    fn compact_is_idempotent() {
        let mut store = VectorStore::new_in_memory(1, None);
        let a = store.add(&[1.0], meta()).unwrap();
        let b = store.add(&[2.0], meta()).unwrap();
        store.delete(a).unwrap();
        store.compact();
        let live_before: Vec<u64> = store.live_ids().collect();
        store.compact();
        let live_after: Vec<u64> = store.live_ids().collect();
        assert_eq!(live_before, live_after);
        let _ = b;
    }

    #[test]
    fn update_data_leaves_metadata_untouched() {
        let mut store = VectorStore::new_in_memory(2, None);
        let mut m = Metadata::new();
        m.insert("k".into(), "v".into());
        let id = store.add(&[1.0, 2.0], m.clone()).unwrap();
        store.update_data(id, &[9.0, 9.0]).unwrap();
        assert_eq!(store.get(id).unwrap(), vec![9.0, 9.0]);
        assert_eq!(store.get_metadata(id), Some(&m));
    }

    #[test]
    fn zero_copy_guard_matches_owned_copy() {
        let mut store = VectorStore::new_in_memory(3, None);
        let id = store.add(&[1.0, 2.0, 3.0], meta()).unwrap();
        let guard = store.get_ref(id).unwrap();
        assert_eq!(guard.as_slice(), &[1.0, 2.0, 3.0]);
    }
}

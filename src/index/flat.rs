//! Flat (exact, brute-force) index — spec.md §4.3.
//!
//! Stores no structure beyond the slot IDs it has seen; every query scans
//! all live slots. Used for small collections or when exactness is forced.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{candidate_is_admissible, materialize, IndexKind, VectorIndex};
use crate::distance::DistanceKind;
use crate::error::Result;
use crate::filter::Filter;
use crate::point::SearchResult;
use crate::store::VectorStore;

#[derive(serde::Serialize, serde::Deserialize)]
pub struct FlatIndex {
    metric: DistanceKind,
    ids: FxHashSet<u64>,
}

impl FlatIndex {
    #[must_use]
    pub fn new(metric: DistanceKind) -> Self {
        Self {
            metric,
            ids: FxHashSet::default(),
        }
    }
}

/// Max-heap entry ordered so the heap's peek is the *worst* (largest
/// distance) of the top-k seen so far — pop it to make room for a better
/// candidate.
struct HeapEntry {
    distance: f32,
    slot_id: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot_id == other.slot_id
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.slot_id.cmp(&other.slot_id))
    }
}

impl VectorIndex for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn insert(&mut self, slot_id: u64, _vector: &[f32], _store: &VectorStore) -> Result<()> {
        self.ids.insert(slot_id);
        Ok(())
    }

    fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>) {
        self.ids = self.ids.iter().filter_map(|id| mapping.get(id).copied()).collect();
    }

    fn knn(
        &self,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(crate::error::GigaError::InvalidArgument("k must be > 0".into()));
        }
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k + 1);
        for &slot_id in &self.ids {
            if !candidate_is_admissible(store, slot_id, filter) {
                continue;
            }
            let Ok(guard) = store.get_ref(slot_id) else {
                continue;
            };
            let distance = self.metric.distance(query, &guard);
            if distance == crate::distance::SENTINEL_DISTANCE {
                continue;
            }
            heap.push(HeapEntry { distance, slot_id });
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut results: Vec<SearchResult> = heap
            .into_iter()
            .filter_map(|e| materialize(store, e.slot_id, e.distance))
            .collect();
        results.sort();
        Ok(results)
    }

    fn range(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let mut results = Vec::new();
        for &slot_id in &self.ids {
            if !candidate_is_admissible(store, slot_id, filter) {
                continue;
            }
            let Ok(guard) = store.get_ref(slot_id) else {
                continue;
            };
            let distance = self.metric.distance(query, &guard);
            if distance <= radius {
                if let Some(r) = materialize(store, slot_id, distance) {
                    results.push(r);
                }
            }
        }
        results.sort();
        results.truncate(max_results);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Metadata;

    fn build(vectors: &[[f32; 3]]) -> (FlatIndex, VectorStore) {
        let mut store = VectorStore::new_in_memory(3, None);
        let mut idx = FlatIndex::new(DistanceKind::Euclidean);
        for v in vectors {
            let id = store.add(v, Metadata::new()).unwrap();
            idx.insert(id, v, &store).unwrap();
        }
        (idx, store)
    }

    #[test]
    fn knn_returns_ascending_sorted() {
        let (idx, store) = build(&[[1.0, 2.0, 3.0], [4.0, 1.5, -0.5], [0.0, 0.0, 0.0]]);
        let results = idx.knn(&[1.5, 2.0, 2.5], 3, &store, None).unwrap();
        assert_eq!(results.len(), 3);
        for w in results.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
    }

    #[test]
    fn knn_k_larger_than_live_count_returns_all() {
        let (idx, store) = build(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let results = idx.knn(&[0.0, 0.0, 0.0], 10, &store, None).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn tombstoned_slots_excluded() {
        let (idx, mut store) = build(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        store.delete(0).unwrap();
        let results = idx.knn(&[1.0, 0.0, 0.0], 2, &store, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].slot_id, 1);
    }

    #[test]
    fn k_zero_is_invalid_argument() {
        let (idx, store) = build(&[[1.0, 0.0, 0.0]]);
        assert!(idx.knn(&[1.0, 0.0, 0.0], 0, &store, None).is_err());
    }

    #[test]
    fn range_keeps_only_within_radius() {
        let (idx, store) = build(&[[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]]);
        let results = idx.range(&[0.0, 0.0, 0.0], 1.0, 10, &store, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].slot_id, 0);
    }

    #[test]
    fn remap_ids_drops_unmapped() {
        let (mut idx, _store) = build(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let mut mapping = FxHashMap::default();
        mapping.insert(1u64, 0u64);
        idx.remap_ids(&mapping);
        assert_eq!(idx.len(), 1);
    }
}

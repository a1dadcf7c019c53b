//! Property-based tests for the universal invariants of spec.md §8, run
//! with `proptest` per SPEC_FULL.md §13.

use gigavector::{Database, DistanceKind, GigaConfig, IndexKind, Vector};
use proptest::prelude::*;

const DIM: usize = 6;

fn bounded_vec() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0f32, DIM)
}

fn config_for(metric: DistanceKind) -> GigaConfig {
    let mut c = GigaConfig::default();
    c.metric = metric;
    c
}

proptest! {
    /// `add` then `knn(vector_of(s), 1, Euclidean)` on the same state
    /// returns `s` with distance < 1e-4, for Flat, KD-tree, and HNSW.
    #[test]
    fn self_insert_is_own_nearest_neighbor(vectors in prop::collection::vec(bounded_vec(), 3..12)) {
        for kind in [IndexKind::Flat, IndexKind::KdTree, IndexKind::Hnsw] {
            let db = Database::open_in_memory(DIM, kind, config_for(DistanceKind::Euclidean)).unwrap();
            let mut ids = Vec::new();
            for v in &vectors {
                ids.push(db.add(&Vector::Dense(v.clone()), None).unwrap());
            }
            for (id, v) in ids.iter().zip(vectors.iter()) {
                let results = db.knn(v, 1, None).unwrap();
                prop_assert_eq!(results[0].slot_id, *id);
                prop_assert!(results[0].distance < 1e-4);
            }
        }
    }

    /// Search results are always ascending by distance, capped at
    /// `min(k, live_count)`, with distinct non-tombstoned slot IDs.
    #[test]
    fn knn_results_are_sorted_bounded_and_distinct(
        vectors in prop::collection::vec(bounded_vec(), 1..20),
        k in 1usize..10,
    ) {
        let db = Database::open_in_memory(DIM, IndexKind::Flat, config_for(DistanceKind::Euclidean)).unwrap();
        for v in &vectors {
            db.add(&Vector::Dense(v.clone()), None).unwrap();
        }
        let query = vectors[0].clone();
        let results = db.knn(&query, k, None).unwrap();

        prop_assert!(results.len() <= k.min(vectors.len()));
        for pair in results.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
        let ids: std::collections::HashSet<u64> = results.iter().map(|r| r.slot_id).collect();
        prop_assert_eq!(ids.len(), results.len());
    }

    /// Euclidean and Manhattan distance are exactly symmetric; cosine is
    /// symmetric within a small tolerance.
    #[test]
    fn distance_symmetry_holds(a in bounded_vec(), b in bounded_vec()) {
        for kind in [DistanceKind::Euclidean, DistanceKind::Manhattan] {
            prop_assert_eq!(kind.distance(&a, &b), kind.distance(&b, &a));
        }
        let cosine_ab = DistanceKind::Cosine.distance(&a, &b);
        let cosine_ba = DistanceKind::Cosine.distance(&b, &a);
        prop_assert!((cosine_ab - cosine_ba).abs() < 1e-4);
    }

    /// `compact; compact` leaves the live count and `knn` results
    /// unchanged relative to a single `compact`.
    #[test]
    fn compact_is_idempotent(vectors in prop::collection::vec(bounded_vec(), 2..15)) {
        let db = Database::open_in_memory(DIM, IndexKind::Flat, config_for(DistanceKind::Euclidean)).unwrap();
        let mut ids = Vec::new();
        for v in &vectors {
            ids.push(db.add(&Vector::Dense(v.clone()), None).unwrap());
        }
        // Tombstone every other slot so compaction has real work to do.
        for id in ids.iter().step_by(2) {
            db.delete(*id).unwrap();
        }

        db.compact().unwrap();
        let count_after_first = db.count();
        let query = vectors[0].clone();
        let results_after_first = db.knn(&query, vectors.len(), None).unwrap();

        db.compact().unwrap();
        let count_after_second = db.count();
        let results_after_second = db.knn(&query, vectors.len(), None).unwrap();

        prop_assert_eq!(count_after_first, count_after_second);
        prop_assert_eq!(results_after_first, results_after_second);
    }
}

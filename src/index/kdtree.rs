//! KD-tree index — spec.md §4.4.
//!
//! Balanced median-split *at construction time is not assumed*: nodes are
//! inserted one at a time (axis = depth mod dimension) with no rebalancing,
//! as the spec requires. Grounded in design note §9 ("manual heap graphs →
//! arena + index"): nodes live in a flat `Vec` and reference each other by
//! `u32` index rather than by pointer, which also makes the structure
//! trivial to snapshot.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use super::{candidate_is_admissible, materialize, IndexKind, VectorIndex};
use crate::distance::DistanceKind;
use crate::error::{GigaError, Result};
use crate::filter::Filter;
use crate::point::SearchResult;
use crate::store::VectorStore;

#[derive(serde::Serialize, serde::Deserialize)]
struct KdNode {
    slot_id: u64,
    axis: usize,
    left: Option<u32>,
    right: Option<u32>,
    /// The vector's value at `axis`, captured at insert time so traversal
    /// can pick a branch direction without re-reading the store — which
    /// matters once `remap_ids` marks a node dead, since its `slot_id` no
    /// longer points at the vector that built this split.
    axis_value: f32,
    /// Set by `remap_ids` for nodes whose slot did not survive compaction.
    /// The node stays in the arena (its children are still reachable
    /// structurally) but is never compared against or emitted, so its
    /// stale `slot_id` can't alias a different, live, compacted slot.
    dead: bool,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct KdTreeIndex {
    metric: DistanceKind,
    dimension: usize,
    nodes: Vec<KdNode>,
    root: Option<u32>,
    live: usize,
}

impl KdTreeIndex {
    #[must_use]
    pub fn new(dimension: usize, metric: DistanceKind) -> Self {
        Self {
            metric,
            dimension,
            nodes: Vec::new(),
            root: None,
            live: 0,
        }
    }

    /// Whether the axis-aligned distance `axis_diff` alone is already
    /// enough to rule out a closer match on the far side of the splitting
    /// hyperplane. Valid for metrics where the whole-vector distance is
    /// always ≥ the single-axis difference (Euclidean, Manhattan); for
    /// metrics without that property (cosine, dot) pruning is unsafe, so
    /// both subtrees are always visited.
    fn axis_bound_is_safe(&self) -> bool {
        matches!(self.metric, DistanceKind::Euclidean | DistanceKind::Manhattan)
    }

    fn worst_in_heap(heap: &BinaryHeap<HeapEntry>, k: usize) -> f32 {
        if heap.len() < k {
            f32::INFINITY
        } else {
            heap.peek().map_or(f32::INFINITY, |e| e.distance)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        node_idx: u32,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
        heap: &mut BinaryHeap<HeapEntry>,
    ) {
        let node = &self.nodes[node_idx as usize];
        if !node.dead {
            if let Ok(guard) = store.get_ref(node.slot_id) {
                if candidate_is_admissible(store, node.slot_id, filter) {
                    let distance = self.metric.distance(query, &guard);
                    if distance != crate::distance::SENTINEL_DISTANCE {
                        heap.push(HeapEntry {
                            distance,
                            slot_id: node.slot_id,
                        });
                        if heap.len() > k {
                            heap.pop();
                        }
                    }
                }
            }
        }
        let axis_diff = query[node.axis] - node.axis_value;
        let (near, far) = if axis_diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(n) = near {
            self.visit(n, query, k, store, filter, heap);
        }
        let worst = Self::worst_in_heap(heap, k);
        let should_skip_far = self.axis_bound_is_safe() && axis_diff.abs() >= worst;
        if !should_skip_far {
            if let Some(f) = far {
                self.visit(f, query, k, store, filter, heap);
            }
        }
    }

    fn visit_range(
        &self,
        node_idx: u32,
        query: &[f32],
        radius: f32,
        store: &VectorStore,
        filter: Option<&Filter>,
        out: &mut Vec<SearchResult>,
    ) {
        let node = &self.nodes[node_idx as usize];
        if !node.dead {
            if let Ok(guard) = store.get_ref(node.slot_id) {
                if candidate_is_admissible(store, node.slot_id, filter) {
                    let distance = self.metric.distance(query, &guard);
                    if distance <= radius {
                        if let Some(r) = materialize(store, node.slot_id, distance) {
                            out.push(r);
                        }
                    }
                }
            }
        }
        let axis_diff = query[node.axis] - node.axis_value;
        let (near, far) = if axis_diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(n) = near {
            self.visit_range(n, query, radius, store, filter, out);
        }
        let should_skip_far = self.axis_bound_is_safe() && axis_diff.abs() >= radius;
        if !should_skip_far {
            if let Some(f) = far {
                self.visit_range(f, query, radius, store, filter, out);
            }
        }
    }
}

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

impl VectorIndex for KdTreeIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::KdTree
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn insert(&mut self, slot_id: u64, vector: &[f32], store: &VectorStore) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(GigaError::InvalidArgument(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let new_idx = self.nodes.len() as u32;
        self.nodes.push(KdNode {
            slot_id,
            axis: 0,
            left: None,
            right: None,
            axis_value: 0.0,
            dead: false,
        });
        self.live += 1;

        let Some(root) = self.root else {
            self.nodes[new_idx as usize].axis = 0;
            self.nodes[new_idx as usize].axis_value = vector[0];
            self.root = Some(new_idx);
            return Ok(());
        };

        let mut cur = root;
        loop {
            let axis = self.nodes[cur as usize].axis;
            let cur_val = self.nodes[cur as usize].axis_value;
            let go_left = vector[axis] < cur_val;
            let next_axis = (axis + 1) % self.dimension;
            self.nodes[new_idx as usize].axis = next_axis;
            self.nodes[new_idx as usize].axis_value = vector[next_axis];
            let next = if go_left {
                self.nodes[cur as usize].left
            } else {
                self.nodes[cur as usize].right
            };
            match next {
                Some(n) => cur = n,
                None => {
                    if go_left {
                        self.nodes[cur as usize].left = Some(new_idx);
                    } else {
                        self.nodes[cur as usize].right = Some(new_idx);
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>) {
        // Structural links are by node index, not slot id, so a node whose
        // slot didn't survive compaction stays in the arena (its children
        // are still reachable structurally) but is marked dead: compaction
        // reuses IDs, so leaving a stale `slot_id` on the node would make
        // it alias a different, now-live slot and double-emit it. `visit`/
        // `visit_range` skip dead nodes for comparison and emission, using
        // the axis value cached at insert time to still pick a branch
        // direction without touching `slot_id`.
        for node in &mut self.nodes {
            match mapping.get(&node.slot_id) {
                Some(&new_id) => node.slot_id = new_id,
                None => node.dead = true,
            }
        }
        self.live = mapping.len();
    }

    fn knn(
        &self,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(GigaError::InvalidArgument("k must be > 0".into()));
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = self.root {
            self.visit(root, query, k, store, filter, &mut heap);
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
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.visit_range(root, query, radius, store, filter, &mut out);
        }
        out.sort();
        out.truncate(max_results);
        Ok(out)
    }

    fn len(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Metadata;

    fn build(vectors: &[[f32; 3]]) -> (KdTreeIndex, VectorStore) {
        let mut store = VectorStore::new_in_memory(3, None);
        let mut idx = KdTreeIndex::new(3, DistanceKind::Euclidean);
        for v in vectors {
            let id = store.add(v, Metadata::new()).unwrap();
            idx.insert(id, v, &store).unwrap();
        }
        (idx, store)
    }

    #[test]
    fn scenario_one_five_points() {
        let vectors = [
            [1.0, 2.0, 3.0],
            [4.0, 1.5, -0.5],
            [0.0, 0.0, 0.0],
            [2.0, 2.5, 3.5],
            [5.0, 0.0, 1.0],
        ];
        let categories = ["A", "B", "A", "A", "B"];
        let mut store = VectorStore::new_in_memory(3, None);
        let mut idx = KdTreeIndex::new(3, DistanceKind::Euclidean);
        for (v, cat) in vectors.iter().zip(categories.iter()) {
            let mut m = Metadata::new();
            m.insert("category".into(), (*cat).into());
            let id = store.add(v, m).unwrap();
            idx.insert(id, v, &store).unwrap();
        }

        let query = [1.5, 2.0, 2.5];
        let all = idx.knn(&query, 5, &store, None).unwrap();
        assert_eq!(all.len(), 5);
        for w in all.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }

        let filter = Filter::new(crate::filter::Condition::eq("category", "A"));
        let filtered = idx.knn(&query, 5, &store, Some(&filter)).unwrap();
        assert_eq!(filtered.len(), 3);
        for r in &filtered {
            assert_eq!(store.get_metadata(r.slot_id).unwrap().get("category").unwrap(), "A");
        }
    }

    #[test]
    fn exact_self_match_is_near_zero_distance() {
        let (idx, store) = build(&[[1.0, 2.0, 3.0], [4.0, 1.5, -0.5], [0.0, 0.0, 0.0]]);
        let results = idx.knn(&[1.0, 2.0, 3.0], 1, &store, None).unwrap();
        assert_eq!(results[0].slot_id, 0);
        assert!(results[0].distance < 1e-4);
    }

    #[test]
    fn deleted_slot_excluded_from_results() {
        let (idx, mut store) = build(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        store.delete(0).unwrap();
        let results = idx.knn(&[1.0, 0.0, 0.0], 3, &store, None).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.slot_id != 0));
    }

    #[test]
    fn range_search_respects_radius() {
        let (idx, store) = build(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [10.0, 0.0, 0.0]]);
        let results = idx.range(&[0.0, 0.0, 0.0], 2.0, 10, &store, None).unwrap();
        assert_eq!(results.len(), 2);
    }

    /// Reproduces the ID-reuse-after-compaction scenario: slot 0 is
    /// deleted, compaction shifts slot 1 down to id 0, and a stale node
    /// kept at the old slot id must not alias the now-live vector there.
    #[test]
    fn remap_ids_marks_unmapped_nodes_dead_not_aliased() {
        let (mut idx, mut store) = build(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        store.delete(0).unwrap();
        let mapping = store.compact();
        // Old slot 1 -> new slot 0, old slot 2 -> new slot 1.
        assert_eq!(mapping.get(&1), Some(&0));
        idx.remap_ids(&mapping);

        let results = idx.knn(&[0.0, 1.0, 0.0], 3, &store, None).unwrap();
        let mut ids: Vec<u64> = results.iter().map(|r| r.slot_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), results.len(), "slot ids in results must be distinct");
        assert_eq!(results.len(), 2);
    }
}

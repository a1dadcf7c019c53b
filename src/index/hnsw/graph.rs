//! HNSW graph construction and search.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceKind;
use crate::error::{GigaError, Result};
use crate::filter::Filter;
use crate::index::{candidate_is_admissible, materialize};
use crate::point::SearchResult;
use crate::store::VectorStore;

/// Tuning parameters for an HNSW graph. `m0` defaults to `2 * m` when not
/// given explicitly, matching spec.md §4.5's "layer 0 capacity M0 = 2M".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswParams {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl HnswParams {
    #[must_use]
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m0: 2 * m,
            ef_construction,
            ef_search,
        }
    }
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 64, 64)
    }
}

/// Maximum HNSW layer, per spec.md §4.5.
const MAX_LEVEL: usize = 32;

#[derive(serde::Serialize, serde::Deserialize)]
struct HnswNode {
    slot_id: u64,
    /// `neighbors[layer]` is the adjacency list at that layer, as arena
    /// indices into `HnswGraph::nodes`.
    neighbors: Vec<Vec<u32>>,
    /// Set by `remap_ids` when this node's slot did not survive
    /// compaction. The node stays in the arena (other nodes' adjacency
    /// lists still reference it by index) but is never compared against
    /// or emitted: compaction reuses IDs, so a stale `slot_id` would
    /// alias a different, now-live slot and double-emit it.
    dead: bool,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub(super) struct HnswGraph {
    pub(super) metric: DistanceKind,
    dimension: usize,
    m: usize,
    m0: usize,
    ef_construction: usize,
    pub(super) ef_search: usize,
    nodes: Vec<HnswNode>,
    slot_to_node: FxHashMap<u64, u32>,
    entry_point: Option<u32>,
    max_level: usize,
    rng_state: u64,
}

#[derive(Clone, Copy)]
struct Candidate {
    distance: f32,
    node: u32,
}
impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.node == other.node
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.node.cmp(&other.node))
    }
}

/// Reverses ordering so a `BinaryHeap<Reverse<Candidate>>` acts as a min-heap.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Reverse(Candidate);
impl PartialOrd for Reverse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Reverse {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl HnswGraph {
    pub(super) fn new(dimension: usize, metric: DistanceKind, params: HnswParams) -> Self {
        Self {
            metric,
            dimension,
            m: params.m.max(1),
            m0: params.m0.max(1),
            ef_construction: params.ef_construction.max(1),
            ef_search: params.ef_search.max(1),
            nodes: Vec::new(),
            slot_to_node: FxHashMap::default(),
            entry_point: None,
            max_level: 0,
            rng_state: 0x9E3779B97F4A7C15,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.slot_to_node.len()
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        x
    }

    /// Uniform float in (0, 1], avoiding the `ln(0)` singularity.
    fn next_unit(&mut self) -> f64 {
        let v = self.next_u64();
        ((v >> 11) as f64 + 1.0) / ((1u64 << 53) as f64 + 1.0)
    }

    /// `floor(-ln(U) / ln(M))`, capped at [`MAX_LEVEL`] (spec.md §4.5).
    fn random_level(&mut self) -> usize {
        let u = self.next_unit();
        let m = (self.m as f64).max(1.000_001);
        let level = (-u.ln() / m.ln()).floor();
        if level.is_finite() && level > 0.0 {
            (level as usize).min(MAX_LEVEL)
        } else {
            0
        }
    }

    fn vector_of(&self, node: u32, store: &VectorStore) -> Option<Vec<f32>> {
        if self.nodes[node as usize].dead {
            return None;
        }
        store.get(self.nodes[node as usize].slot_id).ok()
    }

    fn distance_to_node(&self, query: &[f32], node: u32, store: &VectorStore) -> f32 {
        self.vector_of(node, store)
            .map(|v| self.metric.distance(query, &v))
            .unwrap_or(crate::distance::SENTINEL_DISTANCE)
    }

    /// Greedy single-path descent at `layer`: repeatedly moves to the
    /// neighbor closest to `query` until no neighbor improves on `current`.
    fn greedy_descend(&self, entry: u32, query: &[f32], layer: usize, store: &VectorStore) -> u32 {
        let mut current = entry;
        let mut current_dist = self.distance_to_node(query, current, store);
        loop {
            let mut improved = false;
            if let Some(neighbors) = self.nodes[current as usize].neighbors.get(layer) {
                for &n in neighbors {
                    let d = self.distance_to_node(query, n, store);
                    if d < current_dist {
                        current_dist = d;
                        current = n;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// `ef`-bounded best-first search at `layer`, returning up to `ef`
    /// candidates sorted ascending by distance.
    fn search_layer(
        &self,
        entry: u32,
        query: &[f32],
        layer: usize,
        ef: usize,
        store: &VectorStore,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(entry);
        let entry_dist = self.distance_to_node(query, entry, store);
        let mut candidates = BinaryHeap::new();
        candidates.push(Reverse(Candidate {
            distance: entry_dist,
            node: entry,
        }));
        let mut results = BinaryHeap::new();
        results.push(Candidate {
            distance: entry_dist,
            node: entry,
        });

        while let Some(Reverse(c)) = candidates.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |r| r.distance);
            if c.distance > worst && results.len() >= ef {
                break;
            }
            if let Some(neighbors) = self.nodes[c.node as usize].neighbors.get(layer) {
                for &n in neighbors {
                    if !visited.insert(n) {
                        continue;
                    }
                    let d = self.distance_to_node(query, n, store);
                    let worst_now = results.peek().map_or(f32::INFINITY, |r| r.distance);
                    if results.len() < ef || d < worst_now {
                        candidates.push(Reverse(Candidate { distance: d, node: n }));
                        results.push(Candidate { distance: d, node: n });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_vec();
        out.sort();
        out
    }

    /// Standard neighbor-selection heuristic (spec.md §4.5): keep a
    /// candidate iff it is closer to the target than to any neighbor
    /// already selected.
    fn select_neighbors(&self, candidates: &[Candidate], max_m: usize, store: &VectorStore) -> Vec<u32> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(max_m);
        for &cand in candidates {
            if selected.len() >= max_m {
                break;
            }
            let Some(cand_vec) = self.vector_of(cand.node, store) else {
                continue;
            };
            let mut keep = true;
            for sel in &selected {
                let Some(sel_vec) = self.vector_of(sel.node, store) else {
                    continue;
                };
                let d = self.metric.distance(&cand_vec, &sel_vec);
                if d < cand.distance {
                    keep = false;
                    break;
                }
            }
            if keep {
                selected.push(cand);
            }
        }
        selected.into_iter().map(|c| c.node).collect()
    }

    fn cap_for_layer(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m0
        } else {
            self.m
        }
    }

    /// Connects `from` and `to` at `layer`, pruning `to`'s adjacency back
    /// down to its cap via [`Self::select_neighbors`] if the reverse edge
    /// pushes it over.
    fn connect(&mut self, from: u32, to: u32, layer: usize, store: &VectorStore) {
        self.nodes[from as usize].neighbors[layer].push(to);

        let cap = self.cap_for_layer(layer);
        let to_neighbors = &self.nodes[to as usize].neighbors[layer];
        if !to_neighbors.contains(&from) {
            let mut combined = to_neighbors.clone();
            combined.push(from);
            if combined.len() > cap {
                let Some(to_vec) = self.vector_of(to, store) else {
                    return;
                };
                let mut candidates: Vec<Candidate> = combined
                    .iter()
                    .filter_map(|&n| {
                        self.vector_of(n, store)
                            .map(|v| Candidate {
                                distance: self.metric.distance(&to_vec, &v),
                                node: n,
                            })
                    })
                    .collect();
                candidates.sort();
                let pruned = self.select_neighbors(&candidates, cap, store);
                self.nodes[to as usize].neighbors[layer] = pruned;
            } else {
                self.nodes[to as usize].neighbors[layer] = combined;
            }
        }
    }

    pub(super) fn insert(&mut self, slot_id: u64, vector: &[f32], store: &VectorStore) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(GigaError::InvalidArgument(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let level = self.random_level();
        let new_node = self.nodes.len() as u32;
        self.nodes.push(HnswNode {
            slot_id,
            neighbors: vec![Vec::new(); level + 1],
            dead: false,
        });
        self.slot_to_node.insert(slot_id, new_node);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(new_node);
            self.max_level = level;
            return Ok(());
        };

        let mut cur = entry;
        for layer in (level + 1..=self.max_level).rev() {
            cur = self.greedy_descend(cur, vector, layer, store);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(cur, vector, layer, self.ef_construction, store);
            let selected = self.select_neighbors(&candidates, self.cap_for_layer(layer), store);
            for &neighbor in &selected {
                self.connect(new_node, neighbor, layer, store);
            }
            self.nodes[new_node as usize].neighbors[layer] = selected;
            if let Some(best) = candidates.first() {
                cur = best.node;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(new_node);
        }
        Ok(())
    }

    pub(super) fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>) {
        self.slot_to_node.clear();
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            match mapping.get(&node.slot_id) {
                Some(&new_id) => {
                    node.slot_id = new_id;
                    self.slot_to_node.insert(new_id, idx as u32);
                }
                None => node.dead = true,
            }
        }
        // The entry point must stay a live node: greedy descent starts
        // from it on every search, and a dead entry point would anchor
        // every query on a node that can no longer be compared against.
        if let Some(entry) = self.entry_point {
            if self.nodes[entry as usize].dead {
                self.entry_point = self.nodes.iter().position(|n| !n.dead).map(|i| i as u32);
            }
        }
    }

    pub(super) fn knn(
        &self,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(GigaError::InvalidArgument("k must be > 0".into()));
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        let mut cur = entry;
        for layer in (1..=self.max_level).rev() {
            cur = self.greedy_descend(cur, query, layer, store);
        }
        let ef = self.ef_search.max(k);
        let candidates = self.search_layer(cur, query, 0, ef, store);
        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .filter(|c| !self.nodes[c.node as usize].dead)
            .filter(|c| candidate_is_admissible(store, self.nodes[c.node as usize].slot_id, filter))
            .filter_map(|c| materialize(store, self.nodes[c.node as usize].slot_id, c.distance))
            .collect();
        results.sort();
        results.truncate(k);
        Ok(results)
    }

    pub(super) fn range(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        let mut cur = entry;
        for layer in (1..=self.max_level).rev() {
            cur = self.greedy_descend(cur, query, layer, store);
        }
        let ef = self.ef_search.max(max_results.max(1));
        let candidates = self.search_layer(cur, query, 0, ef.max(self.nodes.len().min(ef * 4)), store);
        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .filter(|c| !self.nodes[c.node as usize].dead)
            .filter(|c| c.distance <= radius)
            .filter(|c| candidate_is_admissible(store, self.nodes[c.node as usize].slot_id, filter))
            .filter_map(|c| materialize(store, self.nodes[c.node as usize].slot_id, c.distance))
            .collect();
        results.sort();
        results.truncate(max_results);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Metadata;

    #[test]
    fn scenario_two_sinusoidal_vectors() {
        let dim = 8;
        let mut store = VectorStore::new_in_memory(dim, None);
        let mut graph = HnswGraph::new(dim, DistanceKind::Euclidean, HnswParams::new(16, 64, 64));
        let mut ids = Vec::new();
        for i in 0..50 {
            let v: Vec<f32> = (0..dim).map(|j| ((i as f32 + 0.7 * j as f32)).sin()).collect();
            let id = store.add(&v, Metadata::new()).unwrap();
            graph.insert(id, &v, &store).unwrap();
            ids.push(id);
        }

        let v0 = store.get(ids[0]).unwrap();
        let result = graph.knn(&v0, 1, &store, None).unwrap();
        assert_eq!(result[0].slot_id, ids[0]);
        assert!(result[0].distance < 1e-3);

        let v5 = store.get(ids[5]).unwrap();
        let results = graph.knn(&v5, 10, &store, None).unwrap();
        for w in results.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
    }

    #[test]
    fn empty_graph_returns_empty() {
        let store = VectorStore::new_in_memory(4, None);
        let graph = HnswGraph::new(4, DistanceKind::Euclidean, HnswParams::default());
        assert!(graph.knn(&[0.0, 0.0, 0.0, 0.0], 5, &store, None).unwrap().is_empty());
    }

    #[test]
    fn random_level_is_deterministic_given_seed() {
        let mut g1 = HnswGraph::new(4, DistanceKind::Euclidean, HnswParams::default());
        let mut g2 = HnswGraph::new(4, DistanceKind::Euclidean, HnswParams::default());
        for _ in 0..10 {
            assert_eq!(g1.random_level(), g2.random_level());
        }
    }

    #[test]
    fn k_zero_is_invalid_argument() {
        let mut store = VectorStore::new_in_memory(3, None);
        let mut graph = HnswGraph::new(3, DistanceKind::Euclidean, HnswParams::default());
        let id = store.add(&[1.0, 0.0, 0.0], Metadata::new()).unwrap();
        graph.insert(id, &[1.0, 0.0, 0.0], &store).unwrap();
        assert!(graph.knn(&[1.0, 0.0, 0.0], 0, &store, None).is_err());
    }

    /// After compaction reuses a deleted slot's id, the dead node left
    /// behind at that id must not alias the now-live vector occupying it.
    #[test]
    fn remap_ids_marks_unmapped_nodes_dead_not_aliased() {
        let dim = 4;
        let mut store = VectorStore::new_in_memory(dim, None);
        let mut graph = HnswGraph::new(dim, DistanceKind::Euclidean, HnswParams::new(16, 64, 64));
        let mut ids = Vec::new();
        for i in 0..12 {
            let v: Vec<f32> = (0..dim).map(|j| (i as f32 * 3.0 + j as f32)).collect();
            let id = store.add(&v, Metadata::new()).unwrap();
            graph.insert(id, &v, &store).unwrap();
            ids.push(id);
        }

        store.delete(ids[0]).unwrap();
        let mapping = store.compact();
        graph.remap_ids(&mapping);

        let query: Vec<f32> = (0..dim).map(|j| j as f32).collect();
        let results = graph.knn(&query, ids.len(), &store, None).unwrap();
        let mut slots: Vec<u64> = results.iter().map(|r| r.slot_id).collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), results.len(), "slot ids in results must be distinct");
    }
}

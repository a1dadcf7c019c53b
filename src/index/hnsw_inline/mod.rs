//! HNSW with inline scalar quantization — spec.md §4.6.
//!
//! Builds on the same arena-and-level-assignment design as [`super::hnsw`],
//! but every node additionally carries a packed quantized byte buffer used
//! to rank candidates cheaply; the top `ef_search` candidates are then
//! reranked against full-precision floats pulled from the
//! [`VectorStore`](crate::store::VectorStore) (no index owns vector bytes
//! alone, per the data model invariant).

mod quantization;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub use quantization::QuantBits;
use quantization::QuantRange;

use super::{candidate_is_admissible, materialize, IndexKind, VectorIndex};
use crate::distance::DistanceKind;
use crate::error::{GigaError, Result};
use crate::filter::Filter;
use crate::point::SearchResult;
use crate::store::VectorStore;

const MAX_LEVEL: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswInlineParams {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub bits: QuantBits,
    /// Positions to prefetch ahead in a neighbor list during scan, or
    /// `None` to disable software prefetch.
    pub prefetch_distance: Option<usize>,
}

impl HnswInlineParams {
    #[must_use]
    pub fn new(m: usize, ef_construction: usize, ef_search: usize, bits: QuantBits) -> Self {
        Self {
            m,
            m0: 2 * m,
            ef_construction,
            ef_search,
            bits,
            prefetch_distance: None,
        }
    }
}

impl Default for HnswInlineParams {
    fn default() -> Self {
        Self::new(16, 64, 64, QuantBits::Eight)
    }
}

/// Progress report for one batch of an incremental rebuild, spec.md §4.6.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RebuildProgress {
    pub nodes_processed: usize,
    pub edges_added: usize,
    pub edges_removed: usize,
    pub elapsed_ms: u64,
    pub done: bool,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct InlineNode {
    slot_id: u64,
    neighbors: Vec<Vec<u32>>,
    quant_bytes: Vec<u8>,
    /// Set by `remap_ids` when this node's slot did not survive
    /// compaction. The node stays in the arena for graph connectivity but
    /// is never reranked against the store or emitted, since compaction
    /// reuses IDs and a stale `slot_id` would alias a different, now-live
    /// slot.
    dead: bool,
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

#[derive(serde::Serialize, serde::Deserialize)]
pub struct HnswInlineIndex {
    metric: DistanceKind,
    dimension: usize,
    m: usize,
    m0: usize,
    ef_construction: usize,
    ef_search: usize,
    bits: QuantBits,
    prefetch_distance: Option<usize>,
    nodes: Vec<InlineNode>,
    slot_to_node: FxHashMap<u64, u32>,
    entry_point: Option<u32>,
    max_level: usize,
    rng_state: u64,
    range: QuantRange,
    rebuild_cursor: Option<usize>,
    rebuild_stats: RebuildProgress,
}

impl HnswInlineIndex {
    #[must_use]
    pub fn new(dimension: usize, metric: DistanceKind, params: HnswInlineParams) -> Self {
        Self {
            metric,
            dimension,
            m: params.m.max(1),
            m0: params.m0.max(1),
            ef_construction: params.ef_construction.max(1),
            ef_search: params.ef_search.max(1),
            bits: params.bits,
            prefetch_distance: params.prefetch_distance,
            nodes: Vec::new(),
            slot_to_node: FxHashMap::default(),
            entry_point: None,
            max_level: 0,
            rng_state: 0xD1B54A32D192ED03,
            range: QuantRange::new(dimension),
            rebuild_cursor: None,
            rebuild_stats: RebuildProgress::default(),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        x
    }

    fn next_unit(&mut self) -> f64 {
        let v = self.next_u64();
        ((v >> 11) as f64 + 1.0) / ((1u64 << 53) as f64 + 1.0)
    }

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

    fn quant_distance(&self, a: &[u8], b: &[u8]) -> f32 {
        quantization::quantized_distance(a, b, self.dimension, self.bits)
    }

    fn full_distance(&self, query: &[f32], node: u32, store: &VectorStore) -> f32 {
        if self.nodes[node as usize].dead {
            return crate::distance::SENTINEL_DISTANCE;
        }
        store
            .get(self.nodes[node as usize].slot_id)
            .map(|v| DistanceKind::Euclidean.distance(query, &v))
            .unwrap_or(crate::distance::SENTINEL_DISTANCE)
    }

    fn quantize_query(&self, query: &[f32]) -> Vec<u8> {
        quantization::quantize(query, &self.range, self.bits)
    }

    fn cap_for_layer(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m0
        } else {
            self.m
        }
    }

    fn greedy_descend(&self, entry: u32, query_bytes: &[u8], layer: usize) -> u32 {
        let mut current = entry;
        let mut current_dist = self.quant_distance(query_bytes, &self.nodes[current as usize].quant_bytes);
        loop {
            let mut improved = false;
            if let Some(neighbors) = self.nodes[current as usize].neighbors.get(layer) {
                for (i, &n) in neighbors.iter().enumerate() {
                    if let Some(pd) = self.prefetch_distance {
                        if let Some(&ahead) = neighbors.get(i + pd) {
                            // Software prefetch hint: touch the neighbor's
                            // quantized bytes ahead of the scan using it.
                            let _ = self.nodes[ahead as usize].quant_bytes.first();
                        }
                    }
                    let d = self.quant_distance(query_bytes, &self.nodes[n as usize].quant_bytes);
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

    fn search_layer(&self, entry: u32, query_bytes: &[u8], layer: usize, ef: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(entry);
        let entry_dist = self.quant_distance(query_bytes, &self.nodes[entry as usize].quant_bytes);
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
                    let d = self.quant_distance(query_bytes, &self.nodes[n as usize].quant_bytes);
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

    /// Standard heuristic (spec.md §4.5/§4.6): keep candidate iff closer to
    /// target (by quantized distance) than to any already-selected.
    fn select_neighbors(&self, candidates: &[Candidate], max_m: usize) -> Vec<u32> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(max_m);
        for &cand in candidates {
            if selected.len() >= max_m {
                break;
            }
            let cand_bytes = &self.nodes[cand.node as usize].quant_bytes;
            let mut keep = true;
            for sel in &selected {
                let sel_bytes = &self.nodes[sel.node as usize].quant_bytes;
                if self.quant_distance(cand_bytes, sel_bytes) < cand.distance {
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

    fn connect(&mut self, from: u32, to: u32, layer: usize) {
        self.nodes[from as usize].neighbors[layer].push(to);
        let cap = self.cap_for_layer(layer);
        let to_neighbors = &self.nodes[to as usize].neighbors[layer];
        if to_neighbors.contains(&from) {
            return;
        }
        let mut combined = to_neighbors.clone();
        combined.push(from);
        if combined.len() > cap {
            let to_bytes = self.nodes[to as usize].quant_bytes.clone();
            let mut candidates: Vec<Candidate> = combined
                .iter()
                .map(|&n| Candidate {
                    distance: self.quant_distance(&to_bytes, &self.nodes[n as usize].quant_bytes),
                    node: n,
                })
                .collect();
            candidates.sort();
            let pruned = self.select_neighbors(&candidates, cap);
            self.nodes[to as usize].neighbors[layer] = pruned;
        } else {
            self.nodes[to as usize].neighbors[layer] = combined;
        }
    }

    /// Starts a new incremental rebuild cursor. Errs if one is already in
    /// flight (spec.md §4.6: "exactly one rebuild may be in flight").
    pub fn start_rebuild(&mut self) -> Result<()> {
        if self.rebuild_cursor.is_some() {
            return Err(GigaError::Internal("rebuild already in progress".into()));
        }
        self.rebuild_cursor = Some(0);
        self.rebuild_stats = RebuildProgress::default();
        Ok(())
    }

    #[must_use]
    pub fn is_rebuild_in_progress(&self) -> bool {
        self.rebuild_cursor.is_some()
    }

    #[must_use]
    pub fn rebuild_status(&self) -> RebuildProgress {
        self.rebuild_stats
    }

    /// Processes one batch of `batch_size` nodes: re-selects each node's
    /// layer-0 neighbors from scratch via an ef-bounded search from the
    /// current entry point, per spec.md §4.6. The caller (the `Database`
    /// façade) takes the write lock for the duration of each call and
    /// releases it between calls.
    pub fn rebuild_batch(&mut self, batch_size: usize) -> Result<RebuildProgress> {
        let Some(cursor) = self.rebuild_cursor else {
            return Err(GigaError::Internal("no rebuild in progress".into()));
        };
        let start = Instant::now();
        let Some(entry) = self.entry_point else {
            self.rebuild_cursor = None;
            self.rebuild_stats.done = true;
            return Ok(self.rebuild_stats);
        };

        let end = (cursor + batch_size).min(self.nodes.len());
        for idx in cursor..end {
            if self.nodes[idx].dead {
                continue;
            }
            let node = idx as u32;
            let query_bytes = self.nodes[idx].quant_bytes.clone();
            let layer_entry = self.greedy_descend(entry, &query_bytes, 0);
            let candidates: Vec<Candidate> = self
                .search_layer(layer_entry, &query_bytes, 0, self.ef_construction)
                .into_iter()
                .filter(|c| c.node != node && !self.nodes[c.node as usize].dead)
                .collect();
            let selected = self.select_neighbors(&candidates, self.m0);

            let old_len = self.nodes[idx].neighbors[0].len();
            let new_len = selected.len();
            self.rebuild_stats.edges_removed += old_len;
            self.rebuild_stats.edges_added += new_len;
            self.nodes[idx].neighbors[0] = selected.clone();
            for &neighbor in &selected {
                self.connect(node, neighbor, 0);
            }
            self.rebuild_stats.nodes_processed += 1;
        }

        self.rebuild_stats.elapsed_ms += start.elapsed().as_millis() as u64;
        if end >= self.nodes.len() {
            self.rebuild_cursor = None;
            self.rebuild_stats.done = true;
        } else {
            self.rebuild_cursor = Some(end);
        }
        Ok(self.rebuild_stats)
    }
}

impl VectorIndex for HnswInlineIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::HnswInline
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn insert(&mut self, slot_id: u64, vector: &[f32], _store: &VectorStore) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(GigaError::InvalidArgument(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        self.range.observe(vector);
        let quant_bytes = quantization::quantize(vector, &self.range, self.bits);

        let level = self.random_level();
        let new_node = self.nodes.len() as u32;
        self.nodes.push(InlineNode {
            slot_id,
            neighbors: vec![Vec::new(); level + 1],
            quant_bytes,
            dead: false,
        });
        self.slot_to_node.insert(slot_id, new_node);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(new_node);
            self.max_level = level;
            return Ok(());
        };

        let query_bytes = self.nodes[new_node as usize].quant_bytes.clone();
        let mut cur = entry;
        for layer in (level + 1..=self.max_level).rev() {
            cur = self.greedy_descend(cur, &query_bytes, layer);
        }
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(cur, &query_bytes, layer, self.ef_construction);
            let selected = self.select_neighbors(&candidates, self.cap_for_layer(layer));
            for &neighbor in &selected {
                self.connect(new_node, neighbor, layer);
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

    fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>) {
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
        // Greedy descent always starts from the entry point; it must stay
        // a live node or every query anchors on one that can no longer be
        // compared against the store.
        if let Some(entry) = self.entry_point {
            if self.nodes[entry as usize].dead {
                self.entry_point = self.nodes.iter().position(|n| !n.dead).map(|i| i as u32);
            }
        }
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
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        let query_bytes = self.quantize_query(query);
        let mut cur = entry;
        for layer in (1..=self.max_level).rev() {
            cur = self.greedy_descend(cur, &query_bytes, layer);
        }
        let ef = self.ef_search.max(k);
        let candidates = self.search_layer(cur, &query_bytes, 0, ef);

        // Rerank the quantized-ranked candidates with full-precision L2.
        let mut reranked: Vec<(f32, u32)> = candidates
            .iter()
            .filter(|c| !self.nodes[c.node as usize].dead)
            .map(|c| (self.full_distance(query, c.node, store), c.node))
            .collect();
        reranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut results: Vec<SearchResult> = reranked
            .into_iter()
            .filter(|(_, node)| {
                candidate_is_admissible(store, self.nodes[*node as usize].slot_id, filter)
            })
            .filter_map(|(d, node)| materialize(store, self.nodes[node as usize].slot_id, d))
            .collect();
        results.sort();
        results.truncate(k);
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
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        let query_bytes = self.quantize_query(query);
        let mut cur = entry;
        for layer in (1..=self.max_level).rev() {
            cur = self.greedy_descend(cur, &query_bytes, layer);
        }
        let ef = self.ef_search.max(max_results.max(1));
        let candidates = self.search_layer(cur, &query_bytes, 0, ef.max(self.nodes.len().min(ef * 4)));
        let mut results: Vec<SearchResult> = candidates
            .iter()
            .filter(|c| !self.nodes[c.node as usize].dead)
            .map(|c| (self.full_distance(query, c.node, store), c.node))
            .filter(|(d, _)| *d <= radius)
            .filter(|(_, node)| {
                candidate_is_admissible(store, self.nodes[*node as usize].slot_id, filter)
            })
            .filter_map(|(d, node)| materialize(store, self.nodes[node as usize].slot_id, d))
            .collect();
        results.sort();
        results.truncate(max_results);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.slot_to_node.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Metadata;

    #[test]
    fn insert_and_query_recovers_exact_match_approximately() {
        let dim = 6;
        let mut store = VectorStore::new_in_memory(dim, None);
        let mut idx = HnswInlineIndex::new(dim, DistanceKind::Euclidean, HnswInlineParams::default());
        let mut ids = Vec::new();
        for i in 0..40 {
            let v: Vec<f32> = (0..dim).map(|j| (i as f32 + j as f32 * 0.3).cos()).collect();
            let id = store.add(&v, Metadata::new()).unwrap();
            idx.insert(id, &v, &store).unwrap();
            ids.push(id);
        }
        let query = store.get(ids[3]).unwrap();
        let results = idx.knn(&query, 1, &store, None).unwrap();
        assert_eq!(results[0].slot_id, ids[3]);
    }

    #[test]
    fn rebuild_processes_all_nodes_in_batches() {
        let dim = 4;
        let mut store = VectorStore::new_in_memory(dim, None);
        let mut idx = HnswInlineIndex::new(dim, DistanceKind::Euclidean, HnswInlineParams::default());
        for i in 0..25 {
            let v: Vec<f32> = (0..dim).map(|j| (i * 4 + j) as f32).collect();
            let id = store.add(&v, Metadata::new()).unwrap();
            idx.insert(id, &v, &store).unwrap();
        }
        idx.start_rebuild().unwrap();
        assert!(idx.start_rebuild().is_err());
        let mut done = false;
        for _ in 0..10 {
            let progress = idx.rebuild_batch(7).unwrap();
            if progress.done {
                done = true;
                break;
            }
        }
        assert!(done);
        assert!(!idx.is_rebuild_in_progress());
        assert_eq!(idx.rebuild_status().nodes_processed, 25);
    }

    #[test]
    fn k_zero_is_invalid_argument() {
        let dim = 3;
        let mut store = VectorStore::new_in_memory(dim, None);
        let mut idx = HnswInlineIndex::new(dim, DistanceKind::Euclidean, HnswInlineParams::default());
        let id = store.add(&[1.0, 0.0, 0.0], Metadata::new()).unwrap();
        idx.insert(id, &[1.0, 0.0, 0.0], &store).unwrap();
        assert!(idx.knn(&[1.0, 0.0, 0.0], 0, &store, None).is_err());
    }

    /// After compaction reuses a deleted slot's id, the dead node left
    /// behind at that id must not alias the now-live vector occupying it.
    #[test]
    fn remap_ids_marks_unmapped_nodes_dead_not_aliased() {
        let dim = 4;
        let mut store = VectorStore::new_in_memory(dim, None);
        let mut idx = HnswInlineIndex::new(dim, DistanceKind::Euclidean, HnswInlineParams::default());
        let mut ids = Vec::new();
        for i in 0..16 {
            let v: Vec<f32> = (0..dim).map(|j| (i as f32 * 2.5 + j as f32)).collect();
            let id = store.add(&v, Metadata::new()).unwrap();
            idx.insert(id, &v, &store).unwrap();
            ids.push(id);
        }

        store.delete(ids[0]).unwrap();
        let mapping = store.compact();
        idx.remap_ids(&mapping);

        let query: Vec<f32> = (0..dim).map(|j| j as f32).collect();
        let results = idx.knn(&query, ids.len(), &store, None).unwrap();
        let mut slots: Vec<u64> = results.iter().map(|r| r.slot_id).collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), results.len(), "slot ids in results must be distinct");
    }
}

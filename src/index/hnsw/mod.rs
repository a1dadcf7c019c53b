//! HNSW (flat) index — spec.md §4.5.
//!
//! Grounded in the teacher's `index/hnsw/native/graph.rs`: an arena of
//! nodes addressed by `u32` index (never raw pointers, per design note §9),
//! xorshift64-seeded level assignment, greedy multi-layer descent to find
//! an entry point, then an `ef`-bounded best-first search at each layer
//! down to and including layer 0.

mod graph;

pub use graph::HnswParams;

use rustc_hash::FxHashMap;

use super::{IndexKind, VectorIndex};
use crate::distance::DistanceKind;
use crate::error::Result;
use crate::filter::Filter;
use crate::point::SearchResult;
use crate::store::VectorStore;

use graph::HnswGraph;

#[derive(serde::Serialize, serde::Deserialize)]
pub struct HnswIndex {
    graph: HnswGraph,
}

impl HnswIndex {
    #[must_use]
    pub fn new(dimension: usize, metric: DistanceKind, params: HnswParams) -> Self {
        Self {
            graph: HnswGraph::new(dimension, metric, params),
        }
    }

    #[must_use]
    pub fn set_ef_search(&mut self, ef_search: usize) -> &mut Self {
        self.graph.ef_search = ef_search.max(1);
        self
    }
}

impl VectorIndex for HnswIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Hnsw
    }

    fn metric(&self) -> DistanceKind {
        self.graph.metric
    }

    fn insert(&mut self, slot_id: u64, vector: &[f32], store: &VectorStore) -> Result<()> {
        self.graph.insert(slot_id, vector, store)
    }

    fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>) {
        self.graph.remap_ids(mapping);
    }

    fn knn(
        &self,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.graph.knn(query, k, store, filter)
    }

    fn range(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.graph.range(query, radius, max_results, store, filter)
    }

    fn len(&self) -> usize {
        self.graph.len()
    }
}

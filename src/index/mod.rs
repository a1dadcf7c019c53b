//! Pluggable index backends.
//!
//! Every backend maps a query vector to ranked slot IDs. None owns vector
//! bytes outright (per spec.md §3): backends hold only slot-ID
//! back-references (plus, for HNSW-inline and IVF-PQ, a derived encoded
//! copy — quantized bytes or a PQ code — never the raw floats), and always
//! go through the [`crate::store::VectorStore`] passed into each call for
//! the vector data itself. The `Database` façade owns both the store and
//! the index under one reader-writer lock and passes the store in by
//! reference; no backend locks anything on its own.

pub mod flat;
pub mod hnsw;
pub mod hnsw_inline;
pub mod ivfpq;
pub mod kdtree;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceKind;
use crate::error::{GigaError, Result};
use crate::filter::Filter;
use crate::point::SearchResult;
use crate::store::VectorStore;

pub use flat::FlatIndex;
pub use hnsw::{HnswIndex, HnswParams};
pub use hnsw_inline::{HnswInlineIndex, HnswInlineParams, QuantBits, RebuildProgress};
pub use ivfpq::{IvfPqIndex, IvfPqParams};
pub use kdtree::KdTreeIndex;

/// Which backend a [`Database`](crate::database::Database) is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum IndexKind {
    Flat = 0,
    KdTree = 1,
    Hnsw = 2,
    HnswInline = 3,
    IvfPq = 4,
}

impl IndexKind {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Flat),
            1 => Some(Self::KdTree),
            2 => Some(Self::Hnsw),
            3 => Some(Self::HnswInline),
            4 => Some(Self::IvfPq),
            _ => None,
        }
    }
}

/// Per-kind construction parameters, passed to [`IndexBackend::new`].
///
/// Mirrors [`IndexKind`] one-for-one; the façade picks a variant at `open`
/// time from [`crate::config::GigaConfig`] and never constructs a backend
/// by any other path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexParams {
    Flat,
    KdTree,
    Hnsw(HnswParams),
    HnswInline(HnswInlineParams),
    IvfPq(IvfPqParams),
}

impl IndexParams {
    /// Builds the per-backend construction params for `kind` from a
    /// [`crate::config::GigaConfig`] — the façade's only path to
    /// constructing a backend (spec.md §4.11: "the façade picks a variant
    /// at `open` time ... and never constructs a backend by any other
    /// path").
    ///
    /// # Errors
    /// Returns [`GigaError::Config`] if `config.hnsw.quant_bits` is
    /// outside `{4, 8}` (the rest of the numeric ranges are already
    /// enforced by [`crate::config::GigaConfig::validate`]).
    pub fn from_config(kind: IndexKind, config: &crate::config::GigaConfig) -> Result<Self> {
        Ok(match kind {
            IndexKind::Flat => Self::Flat,
            IndexKind::KdTree => Self::KdTree,
            IndexKind::Hnsw => Self::Hnsw(HnswParams {
                m: config.hnsw.m,
                m0: config.hnsw.effective_m0(),
                ef_construction: config.hnsw.ef_construction,
                ef_search: config.hnsw.ef_search,
            }),
            IndexKind::HnswInline => {
                let bits = match config.hnsw.quant_bits {
                    4 => hnsw_inline::QuantBits::Four,
                    8 => hnsw_inline::QuantBits::Eight,
                    other => {
                        return Err(GigaError::Config(format!(
                            "hnsw.quant_bits must be 4 or 8, got {other}"
                        )))
                    }
                };
                Self::HnswInline(HnswInlineParams {
                    m: config.hnsw.m,
                    m0: config.hnsw.effective_m0(),
                    ef_construction: config.hnsw.ef_construction,
                    ef_search: config.hnsw.ef_search,
                    bits,
                    prefetch_distance: config.hnsw.prefetch_distance,
                })
            }
            IndexKind::IvfPq => Self::IvfPq(IvfPqParams {
                nlist: config.ivfpq.nlist,
                m: config.ivfpq.m,
                nbits: config.ivfpq.nbits,
                train_iters: config.ivfpq.train_iters,
                nprobe: config.ivfpq.nprobe,
                rerank_top: config.ivfpq.rerank_top,
                cosine: config.ivfpq.cosine,
            }),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> IndexKind {
        match self {
            Self::Flat => IndexKind::Flat,
            Self::KdTree => IndexKind::KdTree,
            Self::Hnsw(_) => IndexKind::Hnsw,
            Self::HnswInline(_) => IndexKind::HnswInline,
            Self::IvfPq(_) => IndexKind::IvfPq,
        }
    }
}

/// Sum-typed index backend, per design note §9 ("opaque `void*` handles
/// across backends → a sum-typed `Index` enum with one variant per
/// backend; the façade dispatches by variant"). The `Database` façade
/// holds exactly one of these; no backend is ever referenced through a
/// trait object.
#[derive(Serialize, Deserialize)]
pub enum IndexBackend {
    Flat(FlatIndex),
    KdTree(KdTreeIndex),
    Hnsw(HnswIndex),
    HnswInline(HnswInlineIndex),
    IvfPq(IvfPqIndex),
}

impl IndexBackend {
    /// Builds an empty backend of the kind named by `params`.
    pub fn new(dimension: usize, metric: DistanceKind, params: IndexParams) -> Result<Self> {
        Ok(match params {
            IndexParams::Flat => Self::Flat(FlatIndex::new(metric)),
            IndexParams::KdTree => Self::KdTree(KdTreeIndex::new(dimension, metric)),
            IndexParams::Hnsw(p) => Self::Hnsw(HnswIndex::new(dimension, metric, p)),
            IndexParams::HnswInline(p) => Self::HnswInline(HnswInlineIndex::new(dimension, metric, p)),
            IndexParams::IvfPq(p) => Self::IvfPq(IvfPqIndex::new(dimension, metric, p)?),
        })
    }

    /// Trains the IVF-PQ coarse quantizer and PQ codebooks.
    ///
    /// # Errors
    /// Returns [`GigaError::InvalidArgument`] for any backend other than
    /// IVF-PQ, since only IVF-PQ requires training (spec.md §4.7).
    pub fn train(&mut self, training_matrix: &[Vec<f32>]) -> Result<()> {
        match self {
            Self::IvfPq(idx) => idx.train(training_matrix),
            _ => Err(GigaError::InvalidArgument(
                "train is only defined for the IVF-PQ backend".into(),
            )),
        }
    }

    /// `knn` with per-call IVF-PQ `nprobe`/`rerank_top` overrides, per
    /// spec.md §6's `knn_ivfpq` operation.
    ///
    /// # Errors
    /// Returns [`GigaError::InvalidArgument`] for any backend other than
    /// IVF-PQ.
    pub fn knn_ivfpq(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
        rerank_top: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        match self {
            Self::IvfPq(idx) => idx.knn_with_overrides(query, k, nprobe, rerank_top, store, filter),
            _ => Err(GigaError::InvalidArgument(
                "knn_ivfpq is only defined for the IVF-PQ backend".into(),
            )),
        }
    }

    /// Starts a background incremental rebuild (spec.md §4.6). Only
    /// meaningful for HNSW-inline; other backends reject it.
    pub fn start_rebuild(&mut self) -> Result<()> {
        match self {
            Self::HnswInline(idx) => idx.start_rebuild(),
            _ => Err(GigaError::InvalidArgument(
                "rebuild is only defined for the HNSW-inline backend".into(),
            )),
        }
    }

    /// Runs one batch of an in-progress rebuild; see
    /// [`HnswInlineIndex::rebuild_batch`].
    pub fn rebuild_batch(&mut self, batch_size: usize) -> Result<RebuildProgress> {
        match self {
            Self::HnswInline(idx) => idx.rebuild_batch(batch_size),
            _ => Err(GigaError::InvalidArgument(
                "rebuild is only defined for the HNSW-inline backend".into(),
            )),
        }
    }

    #[must_use]
    pub fn is_rebuild_in_progress(&self) -> bool {
        matches!(self, Self::HnswInline(idx) if idx.is_rebuild_in_progress())
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        match self {
            Self::IvfPq(idx) => idx.is_trained(),
            _ => true,
        }
    }
}

impl VectorIndex for IndexBackend {
    fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(idx) => idx.kind(),
            Self::KdTree(idx) => idx.kind(),
            Self::Hnsw(idx) => idx.kind(),
            Self::HnswInline(idx) => idx.kind(),
            Self::IvfPq(idx) => idx.kind(),
        }
    }

    fn metric(&self) -> DistanceKind {
        match self {
            Self::Flat(idx) => idx.metric(),
            Self::KdTree(idx) => idx.metric(),
            Self::Hnsw(idx) => idx.metric(),
            Self::HnswInline(idx) => idx.metric(),
            Self::IvfPq(idx) => idx.metric(),
        }
    }

    fn insert(&mut self, slot_id: u64, vector: &[f32], store: &VectorStore) -> Result<()> {
        match self {
            Self::Flat(idx) => idx.insert(slot_id, vector, store),
            Self::KdTree(idx) => idx.insert(slot_id, vector, store),
            Self::Hnsw(idx) => idx.insert(slot_id, vector, store),
            Self::HnswInline(idx) => idx.insert(slot_id, vector, store),
            Self::IvfPq(idx) => idx.insert(slot_id, vector, store),
        }
    }

    fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>) {
        match self {
            Self::Flat(idx) => idx.remap_ids(mapping),
            Self::KdTree(idx) => idx.remap_ids(mapping),
            Self::Hnsw(idx) => idx.remap_ids(mapping),
            Self::HnswInline(idx) => idx.remap_ids(mapping),
            Self::IvfPq(idx) => idx.remap_ids(mapping),
        }
    }

    fn knn(
        &self,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        match self {
            Self::Flat(idx) => idx.knn(query, k, store, filter),
            Self::KdTree(idx) => idx.knn(query, k, store, filter),
            Self::Hnsw(idx) => idx.knn(query, k, store, filter),
            Self::HnswInline(idx) => idx.knn(query, k, store, filter),
            Self::IvfPq(idx) => idx.knn(query, k, store, filter),
        }
    }

    fn range(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        match self {
            Self::Flat(idx) => idx.range(query, radius, max_results, store, filter),
            Self::KdTree(idx) => idx.range(query, radius, max_results, store, filter),
            Self::Hnsw(idx) => idx.range(query, radius, max_results, store, filter),
            Self::HnswInline(idx) => idx.range(query, radius, max_results, store, filter),
            Self::IvfPq(idx) => idx.range(query, radius, max_results, store, filter),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Flat(idx) => idx.len(),
            Self::KdTree(idx) => idx.len(),
            Self::Hnsw(idx) => idx.len(),
            Self::HnswInline(idx) => idx.len(),
            Self::IvfPq(idx) => idx.len(),
        }
    }
}

/// Common surface every index backend implements.
///
/// `knn`/`range` take `store` by reference rather than owning it: the
/// caller (the `Database` façade) already holds the read lock covering
/// both store and index for the duration of the call.
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// The distance metric this index's topology was built around. Flat
    /// and KD-tree accept any metric per query; graph- and code-based
    /// backends (HNSW variants, IVF-PQ) are built around one fixed metric
    /// because their structure encodes metric-specific decisions (greedy
    /// descent direction, PQ LUT construction).
    fn metric(&self) -> DistanceKind;

    /// Inserts `slot_id`/`vector` (already present in `store`) into the
    /// index. `store` is provided so backends that need to compare against
    /// already-indexed vectors (KD-tree axis compares, HNSW neighbor
    /// selection) can fetch them without caching a copy in their own
    /// nodes.
    fn insert(&mut self, slot_id: u64, vector: &[f32], store: &VectorStore) -> Result<()>;

    /// Applies the `old_id -> new_id` mapping produced by
    /// [`VectorStore::compact`](crate::store::VectorStore::compact),
    /// dropping entries for slot IDs absent from the mapping (tombstoned).
    fn remap_ids(&mut self, mapping: &FxHashMap<u64, u64>);

    fn knn(
        &self,
        query: &[f32],
        k: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>>;

    fn range(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        store: &VectorStore,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>>;

    /// Number of entries the index currently tracks (including any not yet
    /// reflecting a pending compaction).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds a [`SearchResult`] from a store lookup, used by every backend's
/// scan/candidate-emission path.
pub(crate) fn materialize(store: &VectorStore, slot_id: u64, distance: f32) -> Option<SearchResult> {
    let vector = store.get(slot_id).ok()?;
    let metadata = store.get_metadata(slot_id).cloned().unwrap_or_default();
    Some(SearchResult {
        slot_id,
        distance,
        vector,
        metadata,
    })
}

/// Whether a candidate passes both liveness and the optional filter.
pub(crate) fn candidate_is_admissible(
    store: &VectorStore,
    slot_id: u64,
    filter: Option<&Filter>,
) -> bool {
    if store.is_tombstoned(slot_id) {
        return false;
    }
    match filter {
        None => true,
        Some(f) => store
            .get_metadata(slot_id)
            .is_some_and(|m| f.matches(m)),
    }
}

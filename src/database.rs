//! Database façade — spec.md §4.11.
//!
//! A single entity combining one [`VectorStore`], one [`IndexBackend`], and
//! one optional [`Wal`] under a reader-writer lock, plus a separate mutex
//! serializing WAL appends so record order matches commit order even under
//! read-lock pipelining (spec.md §5). Every public mutation follows the
//! same protocol: validate, WAL-append-and-fsync, take the write lock,
//! apply, release. Every query takes the read lock, decides an exact-vs-
//! approximate routing, executes, and releases.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{FsyncPolicy, GigaConfig};
use crate::distance::DistanceKind;
use crate::error::{GigaError, Result};
use crate::filter::Filter;
use crate::index::{FlatIndex, IndexBackend, IndexKind, IndexParams, RebuildProgress, VectorIndex};
use crate::point::{Metadata, SearchResult, Vector};
use crate::snapshot;
use crate::store::VectorStore;
use crate::wal::{Wal, WalRecord};

/// Everything the reader-writer lock guards together, per spec.md §5
/// ("per-database reader-writer lock guards store+index").
struct Inner {
    store: VectorStore,
    index: IndexBackend,
}

/// WAL handle plus the path it was opened at, held behind the dedicated
/// WAL mutex (spec.md §4.9, §5: "a separate mutex serializes WAL appends").
struct WalState {
    wal: Option<Wal>,
    path: Option<PathBuf>,
}

#[derive(Default)]
struct Counters {
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,
    range_queries: AtomicU64,
    wal_records: AtomicU64,
}

/// Aggregate counters and shape info returned by [`Database::stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseStats {
    pub dimension: usize,
    pub index_kind: IndexKind,
    pub metric: DistanceKind,
    pub live_count: u64,
    pub tombstone_count: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub queries: u64,
    pub range_queries: u64,
    pub wal_records: u64,
    pub rebuild_in_progress: bool,
}

/// Result of [`Database::health_check`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub trained: bool,
    pub wal_open: bool,
    pub issues: Vec<String>,
}

/// Approximate resident memory, in bytes, per [`Database::memory_usage`].
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MemoryUsage {
    pub vector_bytes: u64,
    pub metadata_entries: u64,
    pub index_entries: u64,
}

/// Embeddable vector database. One store, one index, one optional WAL,
/// under one reader-writer lock — spec.md §4.11.
pub struct Database {
    inner: RwLock<Inner>,
    wal_state: Mutex<WalState>,
    snapshot_path: Option<PathBuf>,
    dimension: usize,
    counters: Counters,
    exact_search_threshold: AtomicUsize,
    force_exact_search: AtomicBool,
    cosine_normalized: AtomicBool,
    filter_overfetch_ratio: AtomicUsize,
    filter_retry_count: AtomicUsize,
    fsync_policy: FsyncPolicy,
}

fn wal_path_for(snapshot_path: &Path, config: &GigaConfig) -> PathBuf {
    let basename = snapshot_path
        .file_name()
        .map(|n| format!("{}.wal", n.to_string_lossy()))
        .unwrap_or_else(|| "gigavector.wal".to_string());
    if let Some(dir) = config.wal_dir() {
        PathBuf::from(dir).join(basename)
    } else {
        let mut p = snapshot_path.as_os_str().to_os_string();
        p.push(".wal");
        PathBuf::from(p)
    }
}

impl Database {
    /// Opens (or creates) the database whose snapshot lives at `path`.
    ///
    /// If `path` exists, loads the snapshot and validates it matches
    /// `dimension`/`index_kind`. Either way, opens (or creates) the WAL
    /// sidecar named per spec.md §6 and replays any records recorded
    /// since the last save — this is how scenario 4 in spec.md §8 (crash
    /// without `save`, reopen, `count == 5`) is satisfied.
    ///
    /// # Errors
    /// [`GigaError::InvalidArgument`] on a dimension/kind mismatch against
    /// an existing snapshot; [`GigaError::CorruptSnapshot`] /
    /// [`GigaError::UnsupportedVersion`] from a bad snapshot file;
    /// [`GigaError::Io`] on underlying file errors.
    pub fn open<P: AsRef<Path>>(
        path: P,
        dimension: usize,
        index_kind: IndexKind,
        config: GigaConfig,
    ) -> Result<Self> {
        config.validate()?;
        if dimension == 0 {
            return Err(GigaError::InvalidArgument("dimension must be > 0".into()));
        }
        let path = path.as_ref().to_path_buf();

        let (store, index) = if path.exists() {
            let (store, index) = snapshot::load(&path)?;
            if store.dimension() != dimension {
                return Err(GigaError::InvalidArgument(format!(
                    "snapshot dimension {} does not match requested {dimension}",
                    store.dimension()
                )));
            }
            if index.kind() != index_kind {
                return Err(GigaError::InvalidArgument(format!(
                    "snapshot index kind {:?} does not match requested {index_kind:?}",
                    index.kind()
                )));
            }
            (store, index)
        } else {
            let store = if config.storage.use_mmap {
                let vectors_path = path.with_extension("vecs");
                VectorStore::new_mmap(dimension, config.storage.max_vectors, &vectors_path)?
            } else {
                VectorStore::new_in_memory(dimension, config.storage.max_vectors)
            };
            let params = IndexParams::from_config(index_kind, &config)?;
            let index = IndexBackend::new(dimension, config.metric, params)?;
            (store, index)
        };

        let db = Self::from_parts(store, index, dimension, Some(path.clone()), &config)?;

        if !config.wal.disable_wal {
            let wal_path = wal_path_for(&path, &config);
            db.attach_wal(&wal_path)?;
        }

        Ok(db)
    }

    /// Opens a database whose float buffer is memory-mapped at a file
    /// derived from `path`, creating it fresh if `path` has no existing
    /// snapshot (spec.md §6's `open_mmap`). An existing snapshot always
    /// decodes into an in-memory buffer (the on-disk format does not
    /// distinguish the two backings, see `store.rs`); the mmap backing
    /// only applies to a brand-new database going forward.
    pub fn open_mmap<P: AsRef<Path>>(
        path: P,
        dimension: usize,
        index_kind: IndexKind,
        mut config: GigaConfig,
    ) -> Result<Self> {
        config.storage.use_mmap = true;
        Self::open(path, dimension, index_kind, config)
    }

    /// Decodes a database directly from a snapshot already held in memory
    /// (spec.md §6's `open_from_memory`). No WAL is attached since there is
    /// no path to derive a sidecar from; callers that need durability
    /// should use [`Self::open`] or [`Self::set_wal_path`] afterwards.
    pub fn open_from_memory(bytes: &[u8], dimension: usize, index_kind: IndexKind) -> Result<Self> {
        let (store, index) = snapshot::decode(bytes)?;
        if store.dimension() != dimension {
            return Err(GigaError::InvalidArgument(format!(
                "snapshot dimension {} does not match requested {dimension}",
                store.dimension()
            )));
        }
        if index.kind() != index_kind {
            return Err(GigaError::InvalidArgument(format!(
                "snapshot index kind {:?} does not match requested {index_kind:?}",
                index.kind()
            )));
        }
        Self::from_parts(store, index, dimension, None, &GigaConfig::default())
    }

    /// Opens a brand-new, purely in-memory database with no backing path
    /// and no WAL — useful for tests and for ephemeral indexes that are
    /// never persisted.
    pub fn open_in_memory(dimension: usize, index_kind: IndexKind, config: GigaConfig) -> Result<Self> {
        config.validate()?;
        if dimension == 0 {
            return Err(GigaError::InvalidArgument("dimension must be > 0".into()));
        }
        let store = VectorStore::new_in_memory(dimension, config.storage.max_vectors);
        let params = IndexParams::from_config(index_kind, &config)?;
        let index = IndexBackend::new(dimension, config.metric, params)?;
        Self::from_parts(store, index, dimension, None, &config)
    }

    fn from_parts(
        store: VectorStore,
        index: IndexBackend,
        dimension: usize,
        snapshot_path: Option<PathBuf>,
        config: &GigaConfig,
    ) -> Result<Self> {
        Ok(Self {
            inner: RwLock::new(Inner { store, index }),
            wal_state: Mutex::new(WalState { wal: None, path: None }),
            snapshot_path,
            dimension,
            counters: Counters::default(),
            exact_search_threshold: AtomicUsize::new(config.search.exact_search_threshold),
            force_exact_search: AtomicBool::new(config.search.force_exact),
            cosine_normalized: AtomicBool::new(config.search.cosine_normalized),
            filter_overfetch_ratio: AtomicUsize::new(config.search.filter_overfetch_ratio.max(1)),
            filter_retry_count: AtomicUsize::new(config.search.filter_retry_count),
            fsync_policy: config.wal.fsync_policy,
        })
    }

    /// Opens (creating if absent) the WAL at `wal_path` and replays any
    /// records recorded since the snapshot this database was loaded from.
    /// Replay re-applies mutations directly to store+index, bypassing the
    /// normal WAL-append step entirely so replayed records are never
    /// re-logged.
    fn attach_wal(&self, wal_path: &Path) -> Result<()> {
        let mut wal = Wal::with_fsync_policy(
            wal_path,
            self.dimension,
            self.inner.read().index.kind(),
            self.fsync_policy,
        )?;
        let records = wal.replay()?;
        if !records.is_empty() {
            tracing::info!(count = records.len(), path = %wal_path.display(), "replaying WAL records");
            let mut guard = self.inner.write();
            for record in records {
                Self::apply_record(&mut guard, record)?;
            }
        }
        let mut state = self.wal_state.lock();
        state.wal = Some(wal);
        state.path = Some(wal_path.to_path_buf());
        Ok(())
    }

    fn apply_record(guard: &mut Inner, record: WalRecord) -> Result<()> {
        match record {
            WalRecord::Insert { vector, metadata } => {
                let slot_id = guard.store.add(&vector, metadata)?;
                guard.index.insert(slot_id, &vector, &guard.store)?;
            }
            WalRecord::Update { slot_id, vector, metadata } => {
                // Replay may see an Update for a slot an Insert in the same
                // batch already created, or (if the store was reloaded from
                // a snapshot) a slot that already carries this data; either
                // way, reapplying is idempotent.
                if guard.store.get(slot_id).is_ok() {
                    guard.store.update_data(slot_id, &vector)?;
                    guard.store.update_metadata(slot_id, metadata)?;
                }
            }
            WalRecord::Delete { slot_id } => {
                if guard.store.get(slot_id).is_ok() {
                    guard.store.delete(slot_id)?;
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn validate_vector(&self, dense: &[f32]) -> Result<()> {
        if dense.len() != self.dimension {
            return Err(GigaError::InvalidArgument(format!(
                "expected dimension {}, got {}",
                self.dimension,
                dense.len()
            )));
        }
        Ok(())
    }

    fn wal_append(&self, record: &WalRecord) -> Result<()> {
        let mut state = self.wal_state.lock();
        if let Some(wal) = state.wal.as_mut() {
            wal.append(record)?;
            self.counters.wal_records.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Inserts `vector` with optional `metadata`, returning its slot ID.
    ///
    /// Follows the mutation protocol of spec.md §4.11: validate, WAL
    /// append + fsync, take the write lock, apply, release.
    pub fn add(&self, vector: &Vector, metadata: Option<Metadata>) -> Result<u64> {
        if vector.is_malformed_sparse() {
            return Err(GigaError::InvalidArgument("sparse vector indices must be sorted and in range".into()));
        }
        let dense = vector.to_dense();
        self.validate_vector(&dense)?;
        let metadata = metadata.unwrap_or_default();
        {
            let guard = self.inner.read();
            if !guard.index.is_trained() {
                return Err(GigaError::NotTrained);
            }
        }

        self.wal_append(&WalRecord::Insert {
            vector: dense.clone(),
            metadata: metadata.clone(),
        })?;

        let mut guard = self.inner.write();
        let slot_id = guard.store.add(&dense, metadata)?;
        guard.index.insert(slot_id, &dense, &guard.store)?;
        drop(guard);
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(slot_id)
    }

    /// Inserts many vectors, returning their slot IDs in input order. Each
    /// vector goes through the same protocol as [`Self::add`]; a failure
    /// partway through still leaves every prior insert committed (no
    /// all-or-nothing transaction semantics, per spec.md §1's scope).
    pub fn add_batch(&self, items: &[(Vector, Option<Metadata>)]) -> Result<Vec<u64>> {
        items.iter().map(|(v, m)| self.add(v, m.clone())).collect()
    }

    /// Overwrites the floats at `slot_id`; metadata is left untouched
    /// (spec.md §4.1). Index structures are not rebuilt: every backend
    /// re-fetches current floats from the store at search time, so the
    /// new data is visible on the next query without reindexing, with the
    /// known exception of HNSW-inline's cached quantized bytes and IVF-PQ's
    /// cached code, which are approximations of the original vector and are
    /// not recomputed on update (see DESIGN.md).
    pub fn update_data(&self, slot_id: u64, vector: &[f32]) -> Result<()> {
        self.validate_vector(vector)?;
        let existing_metadata = {
            let guard = self.inner.read();
            guard.store.get(slot_id)?;
            guard.store.get_metadata(slot_id).cloned().unwrap_or_default()
        };

        self.wal_append(&WalRecord::Update {
            slot_id,
            vector: vector.to_vec(),
            metadata: existing_metadata,
        })?;

        let mut guard = self.inner.write();
        guard.store.update_data(slot_id, vector)?;
        drop(guard);
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Atomically replaces `slot_id`'s metadata chain (spec.md §4.1).
    pub fn update_metadata(&self, slot_id: u64, metadata: Metadata) -> Result<()> {
        let vector = {
            let guard = self.inner.read();
            guard.store.get(slot_id)?
        };

        self.wal_append(&WalRecord::Update {
            slot_id,
            vector: vector.clone(),
            metadata: metadata.clone(),
        })?;

        let mut guard = self.inner.write();
        guard.store.update_metadata(slot_id, metadata)?;
        drop(guard);
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Tombstones `slot_id`; storage is reclaimed only by [`Self::compact`].
    pub fn delete(&self, slot_id: u64) -> Result<()> {
        {
            let guard = self.inner.read();
            guard.store.get(slot_id)?;
        }

        self.wal_append(&WalRecord::Delete { slot_id })?;

        let mut guard = self.inner.write();
        guard.store.delete(slot_id)?;
        drop(guard);
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Shifts live slots forward, rebuilds the tombstone bitmap, and
    /// rebuilds the index's slot-ID references via the returned mapping
    /// (spec.md §4.1). Not WAL-logged: compaction is a pure restructuring
    /// of already-committed state, reproducible by replaying the original
    /// mutations and compacting again (see DESIGN.md).
    pub fn compact(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let mapping = guard.store.compact();
        guard.index.remap_ids(&mapping);
        Ok(())
    }

    /// Decides whether a query on `kind` should route to the exact flat
    /// scan: either `force_exact_search` is set, or `kind` is `KdTree` and
    /// the live count is at or below `exact_search_threshold` (spec.md
    /// §4.11 step 2: "for KD-tree with count ≤ threshold or
    /// `force_exact`, route to §4.3"). The threshold routing is scoped to
    /// KD-tree only — HNSW/HNSW-inline/IVF-PQ never get silently
    /// substituted with exact results below the threshold; `force_exact`
    /// still applies to every backend.
    fn should_route_exact(&self, kind: IndexKind, live_count: u64) -> bool {
        if self.force_exact_search.load(Ordering::Relaxed) {
            return true;
        }
        kind == IndexKind::KdTree && live_count <= self.exact_search_threshold.load(Ordering::Relaxed) as u64
    }

    /// Runs `knn`/`range` with the filter-widen-and-retry policy of
    /// spec.md §4.8: when a filter is present and the result set under-
    /// returns relative to the requested count, overfetch a wider
    /// candidate pool and retry up to `filter_retry_count` times. IVF-PQ is
    /// excluded (spec.md §4.8: "post-filter on emitted candidates only, no
    /// pushdown" — its candidate pool size is the nprobe/rerank knobs, not
    /// k, so widening `k` would not change what gets scanned).
    fn search_with_overfetch<F>(&self, kind: IndexKind, filter: Option<&Filter>, wanted: usize, run: F) -> Result<Vec<SearchResult>>
    where
        F: Fn(usize) -> Result<Vec<SearchResult>>,
    {
        let mut results = run(wanted)?;
        if filter.is_none() || kind == IndexKind::IvfPq {
            return Ok(results);
        }
        let ratio = self.filter_overfetch_ratio.load(Ordering::Relaxed).max(1);
        let retries = self.filter_retry_count.load(Ordering::Relaxed);
        let mut attempt = 0u32;
        while results.len() < wanted && (attempt as usize) < retries {
            attempt += 1;
            let widened = wanted.saturating_mul(ratio.saturating_pow(attempt));
            results = run(widened)?;
        }
        results.truncate(wanted);
        Ok(results)
    }

    /// Approximate or exact k-nearest-neighbor search, per spec.md §4.11's
    /// read protocol.
    ///
    /// # Errors
    /// [`GigaError::InvalidArgument`] if `k == 0` or `query`'s dimension
    /// does not match the database's.
    pub fn knn(&self, query: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(GigaError::InvalidArgument("k must be > 0".into()));
        }
        self.validate_vector(query)?;
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        let guard = self.inner.read();
        let kind = guard.index.kind();
        let live_count = guard.store.live_count();
        if self.should_route_exact(kind, live_count) {
            let metric = guard.index.metric();
            return self.search_with_overfetch(kind, filter, k, |k| {
                exact_scan_knn(&guard.store, metric, query, k, filter)
            });
        }
        self.search_with_overfetch(kind, filter, k, |k| guard.index.knn(query, k, &guard.store, filter))
    }

    /// Runs [`Self::knn`] once per query in `queries`, under one read-lock
    /// acquisition per query (not one for the whole batch), matching the
    /// "callers run queries on their own threads" scheduling model of
    /// spec.md §5 — nothing here prevents a caller from parallelizing this
    /// loop itself.
    pub fn knn_batch(&self, queries: &[Vec<f32>], k: usize, filter: Option<&Filter>) -> Result<Vec<Vec<SearchResult>>> {
        queries.iter().map(|q| self.knn(q, k, filter)).collect()
    }

    /// Range search: all live, filter-admissible slots within `radius`,
    /// ascending by distance, capped at `max_results`.
    pub fn range(&self, query: &[f32], radius: f32, max_results: usize, filter: Option<&Filter>) -> Result<Vec<SearchResult>> {
        self.validate_vector(query)?;
        self.counters.range_queries.fetch_add(1, Ordering::Relaxed);

        let guard = self.inner.read();
        let kind = guard.index.kind();
        let live_count = guard.store.live_count();
        if self.should_route_exact(kind, live_count) {
            let metric = guard.index.metric();
            return exact_scan_range(&guard.store, metric, query, radius, max_results, filter);
        }
        guard.index.range(query, radius, max_results, &guard.store, filter)
    }

    /// IVF-PQ search with per-call `nprobe`/`rerank_top` overrides
    /// (spec.md §6's `knn_ivfpq`). Returns [`GigaError::InvalidArgument`]
    /// if the database's index is not IVF-PQ.
    pub fn knn_ivfpq(&self, query: &[f32], k: usize, nprobe: usize, rerank_top: usize, filter: Option<&Filter>) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(GigaError::InvalidArgument("k must be > 0".into()));
        }
        self.validate_vector(query)?;
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let guard = self.inner.read();
        guard.index.knn_ivfpq(query, k, nprobe, rerank_top, &guard.store, filter)
    }

    /// Trains the IVF-PQ coarse quantizer and PQ codebooks. No-op error for
    /// any other backend (spec.md §4.7).
    pub fn train(&self, training_matrix: &[Vec<f32>]) -> Result<()> {
        let mut guard = self.inner.write();
        guard.index.train(training_matrix)
    }

    /// Live vector count (spec.md §6's `count`).
    #[must_use]
    pub fn count(&self) -> u64 {
        self.inner.read().store.live_count()
    }

    /// Aggregate counters and shape info (spec.md §6's `stats`).
    #[must_use]
    pub fn stats(&self) -> DatabaseStats {
        let guard = self.inner.read();
        DatabaseStats {
            dimension: self.dimension,
            index_kind: guard.index.kind(),
            metric: guard.index.metric(),
            live_count: guard.store.live_count(),
            tombstone_count: guard.store.tombstone_count(),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
            range_queries: self.counters.range_queries.load(Ordering::Relaxed),
            wal_records: self.counters.wal_records.load(Ordering::Relaxed),
            rebuild_in_progress: guard.index.is_rebuild_in_progress(),
        }
    }

    /// Cheap self-diagnosis (spec.md §6's `health_check`): whether the
    /// index is trained (always true except an untrained IVF-PQ) and
    /// whether the WAL is currently open and writable.
    #[must_use]
    pub fn health_check(&self) -> HealthCheck {
        let guard = self.inner.read();
        let trained = guard.index.is_trained();
        let wal_open = self.wal_state.lock().wal.is_some();
        let mut issues = Vec::new();
        if !trained {
            issues.push("index not trained".to_string());
        }
        HealthCheck {
            healthy: issues.is_empty(),
            trained,
            wal_open,
            issues,
        }
    }

    /// Rough resident memory estimate (spec.md §6's `memory_usage`):
    /// the float buffer's high-water-mark extent plus one entry per live
    /// metadata chain and one per index entry. Not exact accounting of
    /// per-backend auxiliary structures (graph adjacency, PQ codebooks).
    #[must_use]
    pub fn memory_usage(&self) -> MemoryUsage {
        let guard = self.inner.read();
        let vector_bytes = guard.store.high_water_mark() * self.dimension as u64 * 4;
        MemoryUsage {
            vector_bytes,
            metadata_entries: guard.store.live_count(),
            index_entries: guard.index.len() as u64,
        }
    }

    /// Writes a full snapshot to `path` (or the path this database was
    /// opened with, if `path` is `None`), then truncates the WAL — spec.md
    /// §3's invariant "after `save`, the WAL is truncated".
    ///
    /// # Errors
    /// [`GigaError::InvalidArgument`] if neither `path` nor an
    /// open-time path is available.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let target = path
            .map(Path::to_path_buf)
            .or_else(|| self.snapshot_path.clone())
            .ok_or_else(|| GigaError::InvalidArgument("no path to save to".into()))?;

        let guard = self.inner.read();
        snapshot::save(&target, &guard.store, &guard.index)?;
        drop(guard);

        let mut state = self.wal_state.lock();
        if let Some(wal) = state.wal.as_mut() {
            wal.truncate()?;
        }
        Ok(())
    }

    /// Flushes any mmap-backed storage and drops the WAL file handle.
    /// Does not implicitly `save`: per spec.md's recovery model, an
    /// un-saved close is expected to be reconstructed from the WAL on the
    /// next [`Self::open`].
    pub fn close(self) -> Result<()> {
        self.inner.read().store.flush()
    }

    /// Starts a background incremental rebuild for HNSW-inline (spec.md
    /// §4.6); rejects any other backend.
    pub fn start_rebuild(&self) -> Result<()> {
        self.inner.write().index.start_rebuild()
    }

    /// Runs one batch of an in-progress rebuild under the write lock,
    /// releasing it between batches (spec.md §4.6: "the rebuild takes the
    /// write lock for each batch then releases it").
    pub fn rebuild_batch(&self, batch_size: usize) -> Result<RebuildProgress> {
        self.inner.write().index.rebuild_batch(batch_size)
    }

    #[must_use]
    pub fn is_rebuild_in_progress(&self) -> bool {
        self.inner.read().index.is_rebuild_in_progress()
    }

    /// Drives a started rebuild to completion on the calling thread,
    /// `batch_size` nodes at a time. Callers wanting the "one internal
    /// background thread" of spec.md §5 can wrap this in
    /// `std::thread::spawn` over an `Arc<Database>`; the engine itself
    /// does not spawn it implicitly.
    pub fn run_rebuild_to_completion(self: &Arc<Self>, batch_size: usize) -> Result<RebuildProgress> {
        self.start_rebuild()?;
        loop {
            let progress = self.rebuild_batch(batch_size)?;
            if progress.done {
                return Ok(progress);
            }
        }
    }

    pub fn set_exact_threshold(&self, threshold: usize) {
        self.exact_search_threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn set_force_exact(&self, force: bool) {
        self.force_exact_search.store(force, Ordering::Relaxed);
    }

    pub fn set_cosine_normalized(&self, normalized: bool) {
        self.cosine_normalized.store(normalized, Ordering::Relaxed);
    }

    #[must_use]
    pub fn cosine_normalized(&self) -> bool {
        self.cosine_normalized.load(Ordering::Relaxed)
    }

    /// Swaps the WAL to a new path, replaying any records found there
    /// (spec.md §6's `set_wal_path`). The prior WAL handle (if any) is
    /// dropped without truncation.
    pub fn set_wal_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        {
            let mut state = self.wal_state.lock();
            state.wal = None;
            state.path = None;
        }
        self.attach_wal(path)
    }

    /// Disables the WAL: future mutations are no longer logged. Existing
    /// durability already fsync'd to the prior WAL file is untouched on
    /// disk (the file is simply no longer appended to).
    pub fn disable_wal(&self) {
        let mut state = self.wal_state.lock();
        state.wal = None;
        state.path = None;
    }
}

/// One-shot exact scan used by the façade's exact-routing path (spec.md
/// §4.3, §4.11): builds a transient [`FlatIndex`] over every currently
/// live slot. Cheap because `FlatIndex` holds nothing but slot IDs; all
/// distance computation reads straight from `store`.
fn exact_scan_knn(store: &VectorStore, metric: DistanceKind, query: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<SearchResult>> {
    let mut flat = FlatIndex::new(metric);
    for id in store.live_ids() {
        flat.insert(id, &[], store)?;
    }
    flat.knn(query, k, store, filter)
}

/// Range-search counterpart of [`exact_scan_knn`].
fn exact_scan_range(
    store: &VectorStore,
    metric: DistanceKind,
    query: &[f32],
    radius: f32,
    max_results: usize,
    filter: Option<&Filter>,
) -> Result<Vec<SearchResult>> {
    let mut flat = FlatIndex::new(metric);
    for id in store.live_ids() {
        flat.insert(id, &[], store)?;
    }
    flat.range(query, radius, max_results, store, filter)
}

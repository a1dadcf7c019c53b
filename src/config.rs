//! Configuration layer — SPEC_FULL.md §11.
//!
//! Grounded in the teacher's `config.rs`: a root config struct assembled by
//! `figment` from layered sources (defaults, then a TOML file, then
//! environment variables), every sub-struct `#[serde(default)]` with its
//! own `Default` impl, and a `validate()` that enforces the numeric ranges
//! the rest of the engine assumes. Environment variables use the `GV_`
//! prefix (spec.md §6 names `GV_WAL_DIR` specifically; the rest follow the
//! same convention for consistency).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceKind;
use crate::error::GigaError;

/// Storage layer configuration — spec.md §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Hard cap on live vectors; `None` means unbounded. Backs
    /// `CapacityExceeded`.
    pub max_vectors: Option<usize>,
    /// Initial slot capacity before the first doubling.
    pub initial_capacity: u64,
    /// Growth multiplier applied when capacity is exceeded. Spec.md §4.1
    /// fixes this at 2.0; kept configurable for tests that want to
    /// exercise growth with a smaller multiplier.
    pub growth_factor: f64,
    /// Whether to back the float buffer with a memory-mapped file instead
    /// of a plain in-memory `Vec`.
    pub use_mmap: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_vectors: None,
            initial_capacity: 1024,
            growth_factor: 2.0,
            use_mmap: false,
        }
    }
}

/// HNSW and HNSW-inline configuration — spec.md §4.5, §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    pub m: usize,
    /// `None` defaults to `2 * m` at construction time.
    pub m0: Option<usize>,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Scalar quantization bit width for the inline variant: `4` or `8`.
    pub quant_bits: u8,
    pub prefetch_distance: Option<usize>,
    /// Batch size for the HNSW-inline incremental rebuild.
    pub rebuild_batch_size: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m0: None,
            ef_construction: 64,
            ef_search: 64,
            quant_bits: 8,
            prefetch_distance: None,
            rebuild_batch_size: 256,
        }
    }
}

impl HnswConfig {
    #[must_use]
    pub fn effective_m0(&self) -> usize {
        self.m0.unwrap_or(2 * self.m)
    }
}

/// IVF-PQ configuration — spec.md §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfPqConfig {
    pub nlist: usize,
    pub m: usize,
    pub nbits: u32,
    pub train_iters: usize,
    pub nprobe: usize,
    pub rerank_top: usize,
    pub cosine: bool,
}

impl Default for IvfPqConfig {
    fn default() -> Self {
        Self {
            nlist: 256,
            m: 8,
            nbits: 8,
            train_iters: 15,
            nprobe: 16,
            rerank_top: 32,
            cosine: false,
        }
    }
}

/// Search-path configuration — spec.md §4.3, §4.8, §4.11.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Live-count threshold at or below which KD-tree/other approximate
    /// searches route to the exact flat scan instead (spec.md §4.3/§4.11).
    pub exact_search_threshold: usize,
    /// Forces every search onto the exact flat path regardless of count.
    pub force_exact: bool,
    /// Whether IVF-PQ cosine-mode normalization is assumed to have already
    /// been applied to stored vectors at insert time.
    pub cosine_normalized: bool,
    /// Candidate overfetch multiplier used when a metadata filter reduces
    /// results below `k` (spec.md §4.8, §9: "tune per workload").
    pub filter_overfetch_ratio: usize,
    /// Number of widen-and-retry attempts after the first filtered pass.
    pub filter_retry_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            exact_search_threshold: 1000,
            force_exact: false,
            cosine_normalized: false,
            filter_overfetch_ratio: 4,
            filter_retry_count: 1,
        }
    }
}

/// WAL durability configuration — spec.md §4.9, §9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Overrides the WAL sidecar directory; mirrors the `GV_WAL_DIR`
    /// environment variable named in spec.md §6 (the env var wins if both
    /// are set, since it is merged into the figment stack last).
    pub wal_dir: Option<String>,
    pub disable_wal: bool,
    /// `PerRecord` fsyncs every append (the spec's floor); `Batched(n)`
    /// groups `n` appends per fsync when the caller accepts relaxed
    /// per-record durability in exchange for throughput.
    pub fsync_policy: FsyncPolicy,
}

/// See [`WalConfig::fsync_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    PerRecord,
    Batched(u32),
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        Self::PerRecord
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            wal_dir: None,
            disable_wal: false,
            fsync_policy: FsyncPolicy::default(),
        }
    }
}

/// Logging configuration — SPEC_FULL.md §12.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A `tracing_subscriber::EnvFilter`-compatible directive string.
    /// The engine never installs a subscriber itself (see §12); this is
    /// read by an embedding application that wants a sensible default.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Root configuration for a `Database`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GigaConfig {
    /// Distance metric the index backend is built around (spec.md §4.2,
    /// §4.5-§4.7). Flat and KD-tree tolerate per-query overrides; the
    /// graph- and code-based backends fix this at construction time.
    pub metric: DistanceKind,
    pub storage: StorageConfig,
    pub hnsw: HnswConfig,
    pub ivfpq: IvfPqConfig,
    pub search: SearchConfig,
    pub wal: WalConfig,
    pub logging: LoggingConfig,
}

impl GigaConfig {
    /// Loads from `gigavector.toml` in the current directory if present,
    /// layering `GV_`-prefixed environment variables on top.
    ///
    /// # Errors
    /// Returns [`GigaError::Config`] if the file exists but fails to parse.
    pub fn load() -> Result<Self, GigaError> {
        Self::load_from_path("gigavector.toml")
    }

    /// Loads from a specific TOML file path (which need not exist — a
    /// missing file simply yields defaults layered with environment
    /// variables), plus `GV_`-prefixed environment variables.
    ///
    /// # Errors
    /// Returns [`GigaError::Config`] if the file exists but fails to parse.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, GigaError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GV_").split("__"));
        let config: Self = figment
            .extract()
            .map_err(|e| GigaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a config directly from a TOML string, skipping the
    /// filesystem and environment layers. Used by tests and by callers
    /// that already have the TOML in memory.
    ///
    /// # Errors
    /// Returns [`GigaError::Config`] if `toml_str` fails to parse.
    pub fn from_toml(toml_str: &str) -> Result<Self, GigaError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));
        let config: Self = figment
            .extract()
            .map_err(|e| GigaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes this configuration back to TOML.
    ///
    /// # Errors
    /// Returns [`GigaError::Config`] if serialization fails (should only
    /// happen for malformed `f64`s like NaN).
    pub fn to_toml(&self) -> Result<String, GigaError> {
        toml::to_string_pretty(self).map_err(|e| GigaError::Config(e.to_string()))
    }

    /// Validates cross-field invariants the engine assumes elsewhere
    /// (IVF-PQ `dimension % m == 0` is validated separately at index
    /// construction time, once `dimension` is known).
    ///
    /// # Errors
    /// Returns [`GigaError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), GigaError> {
        if self.hnsw.m == 0 {
            return Err(GigaError::Config("hnsw.m must be > 0".into()));
        }
        if self.hnsw.ef_search == 0 {
            return Err(GigaError::Config("hnsw.ef_search must be >= 1".into()));
        }
        if self.hnsw.ef_construction == 0 {
            return Err(GigaError::Config("hnsw.ef_construction must be >= 1".into()));
        }
        if !matches!(self.hnsw.quant_bits, 4 | 8) {
            return Err(GigaError::Config("hnsw.quant_bits must be 4 or 8".into()));
        }
        if self.ivfpq.m == 0 {
            return Err(GigaError::Config("ivfpq.m must be > 0".into()));
        }
        if self.ivfpq.nbits == 0 || self.ivfpq.nbits > 8 {
            return Err(GigaError::Config("ivfpq.nbits must be in 1..=8".into()));
        }
        if self.ivfpq.nlist == 0 {
            return Err(GigaError::Config("ivfpq.nlist must be > 0".into()));
        }
        if self.search.filter_overfetch_ratio == 0 {
            return Err(GigaError::Config("search.filter_overfetch_ratio must be > 0".into()));
        }
        if self.storage.growth_factor <= 1.0 {
            return Err(GigaError::Config("storage.growth_factor must be > 1.0".into()));
        }
        Ok(())
    }

    /// Resolves the effective WAL sidecar directory: the `GV_WAL_DIR`
    /// environment variable wins over `wal.wal_dir`, which wins over
    /// "alongside the snapshot file" (spec.md §6).
    #[must_use]
    pub fn wal_dir(&self) -> Option<String> {
        std::env::var("GV_WAL_DIR").ok().or_else(|| self.wal.wal_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GigaConfig::default().validate().is_ok());
    }

    #[test]
    fn from_toml_overrides_defaults() {
        let config = GigaConfig::from_toml("[hnsw]\nm = 32\nef_search = 128\n").unwrap();
        assert_eq!(config.hnsw.m, 32);
        assert_eq!(config.hnsw.ef_search, 128);
        assert_eq!(config.hnsw.ef_construction, 64);
    }

    #[test]
    fn invalid_quant_bits_rejected() {
        let config = GigaConfig::from_toml("[hnsw]\nquant_bits = 6\n");
        assert!(config.is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = GigaConfig::default();
        let toml_str = config.to_toml().unwrap();
        let reloaded = GigaConfig::from_toml(&toml_str).unwrap();
        assert_eq!(reloaded.hnsw.m, config.hnsw.m);
    }
}

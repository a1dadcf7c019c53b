//! # GigaVector
//!
//! An embeddable vector database engine: high-dimensional float vectors
//! with optional string key/value metadata, answered by a pluggable index
//! layer (brute-force, KD-tree, HNSW, HNSW with inline scalar quantization,
//! and IVF-PQ), backed by a write-ahead log and a versioned snapshot
//! codec.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gigavector::{Database, GigaConfig, IndexKind, Vector};
//!
//! # fn main() -> gigavector::Result<()> {
//! let db = Database::open_in_memory(128, IndexKind::Hnsw, GigaConfig::default())?;
//! let slot = db.add(&Vector::Dense(vec![0.0; 128]), None)?;
//! let results = db.knn(&vec![0.0; 128], 10, None)?;
//! assert_eq!(results[0].slot_id, slot);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`store`] | Structure-of-arrays vector payload, metadata, tombstones |
//! | [`distance`] / [`simd`] | Distance kernels and runtime SIMD dispatch |
//! | [`index`] | Pluggable ANN backends (Flat, KD-tree, HNSW, HNSW-inline, IVF-PQ) |
//! | [`filter`] | Metadata predicate compiler and evaluator |
//! | [`wal`] | Write-ahead log with CRC-checked, length-prefixed records |
//! | [`snapshot`] | Versioned binary snapshot codec |
//! | [`database`] | The [`Database`] façade tying the above together |
//! | [`config`] | Layered `figment`-backed configuration |

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod database;
pub mod distance;
pub mod error;
pub mod filter;
pub mod index;
pub mod point;
pub mod simd;
pub mod snapshot;
pub mod store;
pub mod wal;

pub use config::GigaConfig;
pub use database::{Database, DatabaseStats, HealthCheck, MemoryUsage};
pub use distance::DistanceKind;
pub use error::{GigaError, Result};
pub use filter::{Condition, Filter};
pub use index::{IndexKind, RebuildProgress};
pub use point::{Metadata, SearchResult, Vector};

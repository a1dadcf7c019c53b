//! Error types for GigaVector.
//!
//! A single error enum covers every fallible operation in the engine.
//! Error codes follow the pattern `GV-XXX` for easy cross-referencing in
//! logs and bug reports.

use thiserror::Error;

/// Result type alias for GigaVector operations.
pub type Result<T> = std::result::Result<T, GigaError>;

/// Errors that can occur in GigaVector operations.
#[derive(Error, Debug)]
pub enum GigaError {
    /// Null/zero-dimension/mismatched-dimension/`k == 0` inputs (GV-001).
    #[error("[GV-001] invalid argument: {0}")]
    InvalidArgument(String),

    /// Slot ID past the high-water mark, or never assigned (GV-002).
    #[error("[GV-002] slot {0} not found")]
    NotFound(u64),

    /// Slot exists but is tombstoned (GV-003).
    #[error("[GV-003] slot {0} is deleted")]
    Deleted(u64),

    /// `max_vectors` capacity reached (GV-004).
    #[error("[GV-004] capacity exceeded: max_vectors = {0}")]
    CapacityExceeded(usize),

    /// IVF-PQ mutation or query attempted before training (GV-005).
    #[error("[GV-005] index not trained")]
    NotTrained,

    /// Snapshot version outside the set this build understands (GV-006).
    #[error("[GV-006] unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    /// Snapshot magic/CRC mismatch (GV-007).
    #[error("[GV-007] corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Partial or malformed WAL record; tail was truncated (GV-008).
    #[error("[GV-008] WAL corrupt, tail truncated: {0}")]
    WalCorrupt(String),

    /// Underlying file/IO error (GV-009).
    #[error("[GV-009] io error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocation failure or size computation overflow (GV-010).
    #[error("[GV-010] out of memory: {0}")]
    OutOfMemory(String),

    /// Malformed or out-of-range configuration (GV-011).
    #[error("[GV-011] configuration error: {0}")]
    Config(String),

    /// Internal invariant violation; indicates an engine bug (GV-012).
    #[error("[GV-012] internal error: {0}")]
    Internal(String),

    /// Query/insert vector dimension incompatible with a trained IVF-PQ
    /// index (GV-013). Distinct from `InvalidArgument` because it can only
    /// arise after training fixes the index's dimension.
    #[error("[GV-013] dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl GigaError {
    /// Returns the stable error code, e.g. `"GV-001"`.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "GV-001",
            Self::NotFound(_) => "GV-002",
            Self::Deleted(_) => "GV-003",
            Self::CapacityExceeded(_) => "GV-004",
            Self::NotTrained => "GV-005",
            Self::UnsupportedVersion(_) => "GV-006",
            Self::CorruptSnapshot(_) => "GV-007",
            Self::WalCorrupt(_) => "GV-008",
            Self::Io(_) => "GV-009",
            Self::OutOfMemory(_) => "GV-010",
            Self::Config(_) => "GV-011",
            Self::Internal(_) => "GV-012",
            Self::DimensionMismatch { .. } => "GV-013",
        }
    }

    /// Returns true if the engine can keep operating after this error.
    ///
    /// `WalCorrupt` is recoverable by design (the valid prefix is kept);
    /// `Internal` and `CorruptSnapshot` indicate state a caller should not
    /// keep building on.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal(_) | Self::CorruptSnapshot(_))
    }
}

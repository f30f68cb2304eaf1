//! Error types for the jobtrail audit pipeline.
//!
//! All fallible operations across the workspace return `TrailResult<T>`.
//! Variants carry enough context (run id, sink, path) for an orchestrator to
//! decide whether to retry; the ledger itself never retries.

use thiserror::Error;

/// The unified error type for the jobtrail crates.
#[derive(Debug, Error)]
pub enum TrailError {
    /// A payload value has no canonical encoding (non-finite float, binary
    /// blob, non-string map key, ...).
    ///
    /// Raised before any sink is touched, so no partial event exists.
    #[error("encoding error: {reason}")]
    Encoding { reason: String },

    /// The durable store could not be queried for the previous hash.
    ///
    /// Fatal for the call: falling back to an empty hash would forge a new
    /// chain start.
    #[error("cannot recover chain head for run '{run_id}': {reason}")]
    Recovery { run_id: String, reason: String },

    /// Writing to the append file or the durable store failed.
    #[error("persistence failed in {sink}: {reason}")]
    Persistence { sink: String, reason: String },

    /// The run already carries a terminal seal event.
    #[error("run '{run_id}' is sealed; no further events may be appended")]
    RunSealed { run_id: String },

    /// The run identifier is empty or cannot name a run directory.
    #[error("invalid run id: {reason}")]
    InvalidRunId { reason: String },

    /// The run registry has no run with this identifier.
    #[error("run '{run_id}' not found")]
    RunNotFound { run_id: String },

    /// The append file for a verification target does not exist.
    #[error("audit file not found: {path}")]
    AuditFileNotFound { path: String },

    /// A file could not be read.
    #[error("I/O error on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl TrailError {
    /// Shorthand for a `Persistence` error raised by the append file.
    pub fn append_file(reason: impl Into<String>) -> Self {
        Self::Persistence {
            sink: "append-file".to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Persistence` error raised by the durable store.
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Persistence {
            sink: "store".to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the jobtrail crates.
pub type TrailResult<T> = Result<T, TrailError>;

//! Chain verification and cross-check report types.
//!
//! A broken chain is a result, not an error: the verifier always returns a
//! `VerificationReport` and only escalates I/O failures.

use serde::{Deserialize, Serialize};

/// Outcome of replaying one append file (or event sequence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// `run_id` of the first event, `None` for an empty sequence.
    pub run_id: Option<String>,
    /// Number of events that verified before the first break.
    pub events: usize,
    /// True only if every event verified.
    pub valid: bool,
    /// Zero-based position of the first inconsistency.
    pub break_index: Option<usize>,
    /// True when the last verified event is a seal.
    pub sealed: bool,
    /// What went wrong at `break_index`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BreakReason>,
}

impl VerificationReport {
    /// The report for a sequence with no events.
    pub fn empty() -> Self {
        Self {
            run_id: None,
            events: 0,
            valid: true,
            break_index: None,
            sealed: false,
            reason: None,
        }
    }
}

/// Why verification stopped at a given position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakReason {
    /// The line is not a JSON object with exactly the event fields.
    Malformed { message: String },
    /// The line parses, but its bytes are not the canonical encoding of
    /// what it parses to. `offset` is the first differing byte.
    NonCanonical { offset: usize },
    /// `prev_event_hash` does not equal the previous event's hash.
    PrevHashMismatch { expected: String, found: String },
    /// The recomputed hash differs from the stored `event_hash`.
    HashMismatch { recomputed: String, stored: String },
    /// The event belongs to a different run than the first event.
    RunIdMismatch { expected: String, found: String },
    /// An event follows the run's seal event.
    EventAfterSeal,
}

/// Agreement between a run's append file and its durable store rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossCheckReport {
    pub run_id: String,
    pub file_events: usize,
    pub store_events: usize,
    pub status: SyncStatus,
}

/// Relationship of the two `event_hash` sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Both sinks hold the same hashes in the same order.
    InSync,
    /// The store is a strict prefix of the file.
    StoreLags { missing: usize },
    /// The file is a strict prefix of the store.
    FileLags { missing: usize },
    /// The sequences disagree at `index`.
    Diverged { index: usize },
}

impl SyncStatus {
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Self::InSync)
    }
}

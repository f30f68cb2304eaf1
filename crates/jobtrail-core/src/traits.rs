//! Core trait definitions for the jobtrail audit pipeline.
//!
//! These traits are the seams between the ledger and its collaborators:
//!
//! - `RecoverySource` — durable lookup of a run's latest chain head
//! - `AuditStore`     — the durable structured sink for events
//! - `RunRegistry`    — run lifecycle and artifact bookkeeping
//! - `EventLog`       — what an orchestrator calls to record a step
//! - `Clock`          — wall-clock and monotonic timestamps
//!
//! The ledger owns the hashing; implementations of the storage traits only
//! persist and return what they are given.

use jobtrail_contracts::{
    error::TrailResult,
    event::{AuditEvent, ChainHead, Details, StepReport},
    run::{ArtifactRecord, RunRecord, RunStatus},
};

/// A queryable record of previously appended events.
///
/// This is what makes a chain restart-safe: a process with an empty cache
/// asks the recovery source for the head a live process would have used.
pub trait RecoverySource: Send + Sync {
    /// The head after the event most recently appended for `run_id`,
    /// ordered by the store's internal append sequence (never by timestamp).
    ///
    /// Returns `Ok(None)` for a run with no events. An unreachable source
    /// must return `TrailError::Recovery`, never `Ok(None)`.
    fn latest_head(&self, run_id: &str) -> TrailResult<Option<ChainHead>>;

    /// `event_hash` of the most recently appended event for `run_id`.
    fn latest_event_hash(&self, run_id: &str) -> TrailResult<Option<String>> {
        Ok(self.latest_head(run_id)?.map(|head| head.event_hash))
    }
}

/// The durable structured sink.
pub trait AuditStore: RecoverySource {
    /// Append `event` and return its append sequence number.
    ///
    /// The row is written inside a transaction; `commit_gate` runs while the
    /// transaction is open and the row is committed only if it returns `Ok`.
    /// On a gate error the row is rolled back and the gate's error returned.
    fn append_event(
        &self,
        event: &AuditEvent,
        commit_gate: &mut dyn FnMut(&AuditEvent) -> TrailResult<()>,
    ) -> TrailResult<u64>;

    /// All events of `run_id` in append order.
    fn events_for_run(&self, run_id: &str) -> TrailResult<Vec<AuditEvent>>;
}

/// Run lifecycle bookkeeping.
pub trait RunRegistry: Send + Sync {
    /// Register a new run for `url` and return its generated id.
    fn create_run(&self, url: &str) -> TrailResult<String>;

    /// Record the terminal status of a run.
    ///
    /// Returns `TrailError::RunNotFound` for an unknown id.
    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> TrailResult<()>;

    fn get_run(&self, run_id: &str) -> TrailResult<Option<RunRecord>>;

    /// Register a file produced by a run together with its digest.
    fn record_artifact(
        &self,
        run_id: &str,
        kind: &str,
        path: &str,
        sha256: &str,
    ) -> TrailResult<ArtifactRecord>;

    /// Artifacts of `run_id` in registration order.
    fn artifacts_for_run(&self, run_id: &str) -> TrailResult<Vec<ArtifactRecord>>;
}

/// The audit trail as seen by an orchestrator.
///
/// Callers must not invoke `log_event` concurrently for the same run from
/// different processes; the chain has no notion of forks.
pub trait EventLog: Send + Sync {
    /// Append one step outcome to the run's chain and return the completed
    /// event. Both sinks are written before this returns.
    fn log_event(&self, run_id: &str, report: StepReport) -> TrailResult<AuditEvent>;

    /// Append the terminal seal event. Later `log_event` calls for the run
    /// fail with `TrailError::RunSealed`.
    fn seal(&self, run_id: &str, details: Details) -> TrailResult<AuditEvent>;
}

/// Source of event timestamps.
pub trait Clock: Send + Sync {
    /// UTC wall clock, second precision, `Z` suffix.
    fn now_iso(&self) -> String;

    /// Monotonic nanoseconds from an arbitrary origin.
    fn now_ns(&self) -> u64;
}

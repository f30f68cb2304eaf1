//! The audit ledger: owns every run's append-only hash chain.
//!
//! For each `log_event` call the ledger:
//!
//! 1. resolves the previous hash (cache, then the recovery source),
//! 2. stamps wall-clock and monotonic timestamps,
//! 3. hashes the canonical body with the hash-chain engine,
//! 4. writes the store row and the append-file line, committing the row only
//!    after the line is on disk,
//! 5. advances the cached head for the run.
//!
//! Encoding and recovery failures abort before any write. A sink failure
//! leaves the cached head untouched, so the next call re-resolves.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use jobtrail_contracts::{
    error::{TrailError, TrailResult},
    event::{AuditEvent, ChainHead, Details, EventBody, StepReport, SEAL_STEP},
};
use jobtrail_core::{
    canonical,
    traits::{AuditStore, Clock, EventLog},
    SystemClock,
};

use crate::{
    chain::hash_body,
    file_sink::{validate_run_id, AppendFileSink},
};

/// Cached head of one run. `None` until first resolved.
type HeadSlot = Arc<Mutex<Option<ChainHead>>>;

/// The hash-chained event log for any number of runs.
///
/// # Thread safety
///
/// Each run has its own slot mutex, held for the whole append, so calls for
/// the same run inside this process are serialized. Calls for different runs
/// only overlap as far as the store allows: `SqliteStore` holds its single
/// connection for the row insert and the file append, so with it every
/// append in the process, fsync included, runs one at a time. Writers in
/// other processes appending to the same run are not coordinated and must
/// be serialized by the caller.
///
/// A run's slot is dropped once the run is sealed; the store still reports
/// it as sealed if the run is touched again.
pub struct AuditLedger {
    store: Arc<dyn AuditStore>,
    sink: AppendFileSink,
    clock: Arc<dyn Clock>,
    heads: Mutex<HashMap<String, HeadSlot>>,
}

impl AuditLedger {
    /// Create a ledger writing rows to `store` and lines to `sink`.
    ///
    /// The head cache starts empty; chains already present in `store` are
    /// picked up on first use.
    pub fn new(store: Arc<dyn AuditStore>, sink: AppendFileSink) -> Self {
        Self {
            store,
            sink,
            clock: Arc::new(SystemClock),
            heads: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(&self) -> &AppendFileSink {
        &self.sink
    }

    /// Path of a run's append file.
    pub fn audit_path(&self, run_id: &str) -> TrailResult<PathBuf> {
        self.sink.path_for(run_id)
    }

    /// The hash the next event of `run_id` would chain from (`""` for a run
    /// with no events).
    pub fn latest_hash(&self, run_id: &str) -> TrailResult<String> {
        validate_run_id(run_id)?;
        let slot = self.slot(run_id)?;
        let mut head = lock_slot(&slot)?;
        Ok(self.resolve_head(run_id, &mut head)?.event_hash)
    }

    fn slot(&self, run_id: &str) -> TrailResult<HeadSlot> {
        let mut heads = self.heads.lock().map_err(|e| TrailError::Persistence {
            sink: "ledger-cache".to_string(),
            reason: format!("head cache lock poisoned: {e}"),
        })?;
        Ok(heads.entry(run_id.to_string()).or_default().clone())
    }

    /// Drop a sealed run's slot. Callers still holding the slot see the
    /// sealed head; new callers recover it from the store.
    fn forget(&self, run_id: &str) {
        if let Ok(mut heads) = self.heads.lock() {
            heads.remove(run_id);
        }
    }

    /// Number of runs with a cached head.
    #[cfg(test)]
    pub(crate) fn cached_runs(&self) -> usize {
        self.heads.lock().map(|heads| heads.len()).unwrap_or_default()
    }

    /// Cached head, or the recovery source's answer on a miss. The recovered
    /// head is cached so later calls skip the store.
    fn resolve_head(&self, run_id: &str, cached: &mut Option<ChainHead>) -> TrailResult<ChainHead> {
        if let Some(head) = cached.as_ref() {
            return Ok(head.clone());
        }

        let head = self
            .store
            .latest_head(run_id)?
            .unwrap_or_else(ChainHead::genesis);
        debug!(
            run_id = %run_id,
            prev_hash = %head.event_hash,
            sealed = head.sealed,
            "recovered chain head from store"
        );
        *cached = Some(head.clone());
        Ok(head)
    }

    fn append(&self, run_id: &str, report: StepReport) -> TrailResult<AuditEvent> {
        validate_run_id(run_id)?;

        let slot = self.slot(run_id)?;
        let mut cached = lock_slot(&slot)?;

        // ── Step 1: previous hash ────────────────────────────────────────────
        let head = self.resolve_head(run_id, &mut cached)?;
        if head.sealed {
            self.forget(run_id);
            warn!(run_id = %run_id, step = %report.step, "append rejected: run is sealed");
            return Err(TrailError::RunSealed {
                run_id: run_id.to_string(),
            });
        }

        // ── Steps 2 & 3: stamp, encode, hash ─────────────────────────────────
        let body = EventBody {
            run_id: run_id.to_string(),
            step: report.step,
            status: report.status,
            ts_iso: self.clock.now_iso(),
            ts_ns: self.clock.now_ns(),
            input_digest: report.input_digest,
            output_digest: report.output_digest,
            artifact_paths: report.artifact_paths,
            details: report.details,
            prev_event_hash: head.event_hash,
        };
        let event_hash = hash_body(&body)?;
        let event = AuditEvent::from_parts(body, event_hash);
        let line = canonical::encode(&event)?;

        // ── Step 4: both sinks; the row commits only after the line lands ────
        let seq = self
            .store
            .append_event(&event, &mut |_event: &AuditEvent| {
                self.sink.append_line(run_id, &line)
            })
            .map_err(|e| {
                warn!(run_id = %run_id, step = %event.step, error = %e, "audit append failed");
                e
            })?;

        // ── Step 5: advance the cached head ──────────────────────────────────
        let head = ChainHead::after(&event);
        let sealed = head.sealed;
        *cached = Some(head);
        if sealed {
            self.forget(run_id);
        }

        debug!(
            run_id = %run_id,
            seq,
            step = %event.step,
            status = %event.status,
            event_hash = %event.event_hash,
            "audit event appended"
        );
        Ok(event)
    }
}

fn lock_slot(slot: &HeadSlot) -> TrailResult<MutexGuard<'_, Option<ChainHead>>> {
    slot.lock().map_err(|e| TrailError::Persistence {
        sink: "ledger-cache".to_string(),
        reason: format!("run slot lock poisoned: {e}"),
    })
}

impl EventLog for AuditLedger {
    /// Append one step outcome. A report whose step is the seal step seals
    /// the run exactly as `seal` does.
    fn log_event(&self, run_id: &str, report: StepReport) -> TrailResult<AuditEvent> {
        self.append(run_id, report)
    }

    fn seal(&self, run_id: &str, details: Details) -> TrailResult<AuditEvent> {
        let event = self.append(run_id, StepReport::ok(SEAL_STEP).with_details(details))?;
        info!(
            run_id = %run_id,
            terminal_hash = %event.event_hash,
            "audit chain sealed"
        );
        Ok(event)
    }
}

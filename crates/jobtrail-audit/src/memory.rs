//! In-memory implementation of `AuditStore`.
//!
//! `InMemoryStore` keeps rows in a `Vec` behind a `Mutex`, numbered by an
//! append sequence exactly like a database row id. It is the store used by
//! embedders that only need the append file, and by tests that need a
//! recovery source without SQLite.

use std::sync::Mutex;

use jobtrail_contracts::{
    error::{TrailError, TrailResult},
    event::{AuditEvent, ChainHead},
};
use jobtrail_core::traits::{AuditStore, RecoverySource};

// ── Internal mutable state ───────────────────────────────────────────────────

pub(crate) struct InMemoryState {
    /// `(append sequence, event)` in append order.
    pub(crate) rows: Vec<(u64, AuditEvent)>,

    /// The next sequence number to assign (starts at 1).
    pub(crate) next_seq: u64,
}

// ── Public store ─────────────────────────────────────────────────────────────

/// An append-only event store that lives as long as the process.
pub struct InMemoryStore {
    pub(crate) state: Mutex<InMemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                rows: Vec::new(),
                next_seq: 1,
            }),
        }
    }

    /// Total number of rows across all runs.
    pub fn len(&self) -> TrailResult<usize> {
        Ok(self.lock()?.rows.len())
    }

    pub fn is_empty(&self) -> TrailResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> TrailResult<std::sync::MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|e| TrailError::store(format!("in-memory store lock poisoned: {e}")))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoverySource for InMemoryStore {
    fn latest_head(&self, run_id: &str) -> TrailResult<Option<ChainHead>> {
        let state = self.state.lock().map_err(|e| TrailError::Recovery {
            run_id: run_id.to_string(),
            reason: format!("in-memory store lock poisoned: {e}"),
        })?;

        Ok(state
            .rows
            .iter()
            .rev()
            .find(|(_, event)| event.run_id == run_id)
            .map(|(_, event)| ChainHead::after(event)))
    }
}

impl AuditStore for InMemoryStore {
    fn append_event(
        &self,
        event: &AuditEvent,
        commit_gate: &mut dyn FnMut(&AuditEvent) -> TrailResult<()>,
    ) -> TrailResult<u64> {
        let mut state = self.lock()?;
        let seq = state.next_seq;

        // Nothing is visible until the gate passes, which is the in-memory
        // equivalent of an uncommitted transaction.
        commit_gate(event)?;

        state.rows.push((seq, event.clone()));
        state.next_seq += 1;
        Ok(seq)
    }

    fn events_for_run(&self, run_id: &str) -> TrailResult<Vec<AuditEvent>> {
        let state = self.lock()?;
        Ok(state
            .rows
            .iter()
            .filter(|(_, event)| event.run_id == run_id)
            .map(|(_, event)| event.clone())
            .collect())
    }
}

//! # jobtrail-audit
//!
//! Append-only, SHA-256 hash-chained audit ledger for job-posting runs.
//!
//! ## Overview
//!
//! Every step an orchestrator reports becomes an `AuditEvent` linked to the
//! previous event of the same run by its hash. Each event is written to two
//! sinks before `log_event` returns: a line in the run's `audit.jsonl` and a
//! row in the durable store, which is also where a restarted process
//! recovers the chain head from.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use jobtrail_audit::{AppendFileSink, AuditLedger, InMemoryStore};
//! use jobtrail_contracts::event::StepReport;
//! use jobtrail_core::traits::EventLog;
//!
//! let ledger = AuditLedger::new(Arc::new(InMemoryStore::new()), AppendFileSink::new("artifacts"));
//! let first = ledger.log_event("r1", StepReport::ok("s1"))?;
//! let second = ledger.log_event("r1", StepReport::ok("s2"))?;
//! assert_eq!(second.prev_event_hash, first.event_hash);
//! ```

pub mod chain;
pub mod digest;
pub mod file_sink;
pub mod ledger;
pub mod memory;

pub use chain::{hash_body, next_hash};
pub use digest::{sha256_bytes, sha256_file};
pub use file_sink::{validate_run_id, AppendFileSink, DEFAULT_AUDIT_FILE};
pub use ledger::AuditLedger;
pub use memory::InMemoryStore;

// ── Tests ────────────────────────────────────────────────────────────────────

//! # jobtrail-store
//!
//! SQLite persistence for the jobtrail audit ledger.
//!
//! `SqliteStore` is the durable recovery source the ledger asks for a run's
//! previous hash after a restart, the structured sink every event is also
//! written to, and the registry of runs and their artifacts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use jobtrail_store::{SqliteStore, DEFAULT_BUSY_TIMEOUT};
//!
//! let store = Arc::new(SqliteStore::open("automation.db", DEFAULT_BUSY_TIMEOUT)?);
//! let ledger = AuditLedger::new(store.clone(), AppendFileSink::new("artifacts"));
//! ```

pub mod sqlite;

pub use sqlite::{SqliteStore, DEFAULT_BUSY_TIMEOUT};

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use jobtrail_contracts::{
        error::{TrailError, TrailResult},
        event::{AuditEvent, EventStatus, SEAL_STEP},
        run::RunStatus,
    };
    use jobtrail_core::traits::{AuditStore, RecoverySource, RunRegistry};

    use super::{SqliteStore, DEFAULT_BUSY_TIMEOUT};

    fn event(run_id: &str, step: &str, prev: &str, hash: &str, ts_ns: u64) -> AuditEvent {
        AuditEvent {
            run_id: run_id.to_string(),
            step: step.to_string(),
            status: EventStatus::Ok,
            ts_iso: "2026-01-01T00:00:00Z".to_string(),
            ts_ns,
            input_digest: None,
            output_digest: Some("ab".repeat(32)),
            artifact_paths: vec!["page.html".to_string()],
            details: json!({ "b": [1, 2.5], "a": { "nested": null } })
                .as_object()
                .cloned()
                .unwrap(),
            prev_event_hash: prev.to_string(),
            event_hash: hash.to_string(),
        }
    }

    fn pass(_: &AuditEvent) -> TrailResult<()> {
        Ok(())
    }

    // ── Recovery source ──────────────────────────────────────────────────────

    #[test]
    fn test_empty_run_has_no_head() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.latest_head("r1").unwrap(), None);
        assert_eq!(store.latest_event_hash("r1").unwrap(), None);
    }

    #[test]
    fn test_latest_head_follows_append_order_not_timestamps() {
        let store = SqliteStore::in_memory().unwrap();
        // Second event carries an earlier monotonic timestamp.
        store.append_event(&event("r1", "s1", "", "h1", 900), &mut pass).unwrap();
        store.append_event(&event("r1", "s2", "h1", "h2", 100), &mut pass).unwrap();
        store.append_event(&event("r2", "s1", "", "other", 50), &mut pass).unwrap();

        assert_eq!(store.latest_event_hash("r1").unwrap().as_deref(), Some("h2"));
        assert_eq!(store.latest_event_hash("r2").unwrap().as_deref(), Some("other"));
        assert!(!store.latest_head("r1").unwrap().unwrap().sealed);
    }

    #[test]
    fn test_seal_row_marks_head_sealed() {
        let store = SqliteStore::in_memory().unwrap();
        store.append_event(&event("r1", "s1", "", "h1", 1), &mut pass).unwrap();
        store.append_event(&event("r1", SEAL_STEP, "h1", "h2", 2), &mut pass).unwrap();

        let head = store.latest_head("r1").unwrap().unwrap();
        assert_eq!(head.event_hash, "h2");
        assert!(head.sealed);
    }

    // ── Event store ──────────────────────────────────────────────────────────

    #[test]
    fn test_events_round_trip_through_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let first = event("r1", "s1", "", "h1", 1);
        let second = event("r1", "s2", "h1", "h2", 2);

        let id1 = store.append_event(&first, &mut pass).unwrap();
        let id2 = store.append_event(&second, &mut pass).unwrap();

        assert!(id2 > id1);
        assert_eq!(store.events_for_run("r1").unwrap(), vec![first, second]);
        assert_eq!(store.event_count("r1").unwrap(), 2);
    }

    #[test]
    fn test_gate_failure_rolls_back_the_row() {
        let store = SqliteStore::in_memory().unwrap();
        let mut failing =
            |_: &AuditEvent| -> TrailResult<()> { Err(TrailError::append_file("disk full")) };

        let err = store
            .append_event(&event("r1", "s1", "", "h1", 1), &mut failing)
            .unwrap_err();

        assert!(matches!(err, TrailError::Persistence { ref sink, .. } if sink == "append-file"));
        assert_eq!(store.latest_head("r1").unwrap(), None);
        assert_eq!(store.event_count("r1").unwrap(), 0);
    }

    #[test]
    fn test_gate_sees_the_event_being_committed() {
        let store = SqliteStore::in_memory().unwrap();
        let mut seen = Vec::new();
        store
            .append_event(&event("r1", "s1", "", "h1", 1), &mut |e: &AuditEvent| -> TrailResult<()> {
                seen.push(e.event_hash.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["h1".to_string()]);
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("automation.db");

        {
            let store = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
            store.append_event(&event("r1", "s1", "", "h1", 1), &mut pass).unwrap();
            store.append_event(&event("r1", "s2", "h1", "h2", 2), &mut pass).unwrap();
        }

        let reopened = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.latest_event_hash("r1").unwrap().as_deref(), Some("h2"));
        assert_eq!(reopened.events_for_run("r1").unwrap().len(), 2);
    }

    // ── Run registry ─────────────────────────────────────────────────────────

    #[test]
    fn test_run_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = store.create_run("https://jobs.example.com/posting/42").unwrap();
        assert!(uuid::Uuid::parse_str(&run_id).is_ok());

        let run = store.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.url, "https://jobs.example.com/posting/42");
        assert!(run.finished_at.is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(&run.started_at).is_ok());

        store
            .finish_run(&run_id, RunStatus::Error, Some("login wall"))
            .unwrap();
        let run = store.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.error_message.as_deref(), Some("login wall"));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_unknown_runs_are_reported() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get_run("nope").unwrap(), None);
        assert!(matches!(
            store.finish_run("nope", RunStatus::Ok, None),
            Err(TrailError::RunNotFound { .. })
        ));
        assert!(matches!(
            store.record_artifact("nope", "html", "a.html", "00"),
            Err(TrailError::RunNotFound { .. })
        ));
    }

    #[test]
    fn test_artifacts_are_listed_in_insertion_order() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = store.create_run("https://example.com").unwrap();
        let other = store.create_run("https://example.org").unwrap();

        let a = store.record_artifact(&run_id, "raw_html_before", "before.html", "aa").unwrap();
        store.record_artifact(&other, "screenshot", "shot.png", "cc").unwrap();
        let b = store.record_artifact(&run_id, "screenshot", "after.png", "bb").unwrap();

        let listed = store.artifacts_for_run(&run_id).unwrap();
        assert_eq!(listed, vec![a, b]);
        assert!(listed[0].id < listed[1].id);
    }
}

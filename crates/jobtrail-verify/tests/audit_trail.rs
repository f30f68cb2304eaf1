//! End-to-end checks: ledger + SQLite store + append file + verifier.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use jobtrail_audit::{next_hash, AppendFileSink, AuditLedger};
use jobtrail_contracts::{
    error::TrailError,
    event::{Details, StepReport},
    run::RunStatus,
    verify::{BreakReason, SyncStatus},
};
use jobtrail_core::{canonical, traits::EventLog, RunRecorder};
use jobtrail_store::{SqliteStore, DEFAULT_BUSY_TIMEOUT};
use jobtrail_verify::{cross_check, ChainVerifier};

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn artifacts(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    fn store(&self) -> Arc<SqliteStore> {
        let path = self.dir.path().join("automation.db");
        Arc::new(SqliteStore::open(path, DEFAULT_BUSY_TIMEOUT).unwrap())
    }

    fn ledger(&self, store: Arc<SqliteStore>) -> AuditLedger {
        AuditLedger::new(store, AppendFileSink::new(self.artifacts()))
    }
}

fn details(value: Value) -> Details {
    value.as_object().cloned().unwrap()
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn write_lines(path: &Path, lines: &[String]) {
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(path, text).unwrap();
}

/// Log the three-step reference scenario for run `r1`.
fn log_reference_run(ledger: &AuditLedger) {
    ledger.log_event("r1", StepReport::ok("s1")).unwrap();
    ledger
        .log_event("r1", StepReport::ok("s2").with_details(details(json!({ "x": 1 }))))
        .unwrap();
    ledger
        .log_event("r1", StepReport::error("s3").with_details(details(json!({ "msg": "boom" }))))
        .unwrap();
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn test_reference_run_verifies() {
    let ws = Workspace::new();
    let store = ws.store();
    let ledger = ws.ledger(store.clone());
    log_reference_run(&ledger);

    let path = ledger.audit_path("r1").unwrap();
    let lines = read_lines(&path);
    assert_eq!(lines.len(), 3);

    // Line 3's hash chains from line 2's hash over line 3's own fields.
    let line2: Value = serde_json::from_str(&lines[1]).unwrap();
    let mut line3: Value = serde_json::from_str(&lines[2]).unwrap();
    let stored = line3.as_object_mut().unwrap().remove("event_hash").unwrap();
    assert_eq!(line3["prev_event_hash"], line2["event_hash"]);
    assert_eq!(line3["status"], "error");
    let recomputed = next_hash(
        line2["event_hash"].as_str().unwrap(),
        &canonical::encode_value(&line3),
    );
    assert_eq!(stored, json!(recomputed));

    let report = ChainVerifier::new().verify_file(&path).unwrap();
    assert!(report.valid, "unexpected break: {:?}", report.reason);
    assert_eq!(report.events, 3);
    assert_eq!(report.run_id.as_deref(), Some("r1"));
    assert_eq!(report.break_index, None);

    let sync = cross_check(&path, store.as_ref(), "r1").unwrap();
    assert_eq!(sync.status, SyncStatus::InSync);
    assert_eq!((sync.file_events, sync.store_events), (3, 3));
}

#[test]
fn test_tampered_details_byte_is_detected() {
    let ws = Workspace::new();
    let ledger = ws.ledger(ws.store());
    log_reference_run(&ledger);

    let path = ledger.audit_path("r1").unwrap();
    let mut lines = read_lines(&path);
    assert!(lines[1].contains(r#""details":{"x":1}"#));
    lines[1] = lines[1].replace(r#""details":{"x":1}"#, r#""details":{"x":2}"#);
    write_lines(&path, &lines);

    let report = ChainVerifier::new().verify_file(&path).unwrap();
    assert!(!report.valid);
    assert_eq!(report.break_index, Some(1));
    assert_eq!(report.events, 1);
    assert!(matches!(report.reason, Some(BreakReason::HashMismatch { .. })));
}

#[test]
fn test_tampered_prev_hash_is_detected() {
    let ws = Workspace::new();
    let ledger = ws.ledger(ws.store());
    log_reference_run(&ledger);

    let path = ledger.audit_path("r1").unwrap();
    let mut lines = read_lines(&path);
    let mut event: Value = serde_json::from_str(&lines[2]).unwrap();
    event["prev_event_hash"] = json!("f".repeat(64));
    lines[2] = String::from_utf8(canonical::encode_value(&event)).unwrap();
    write_lines(&path, &lines);

    let report = ChainVerifier::new().verify_file(&path).unwrap();
    assert_eq!(report.break_index, Some(2));
    assert!(matches!(report.reason, Some(BreakReason::PrevHashMismatch { .. })));
}

/// Flip the spelling of the exponent in the first number after `key`
/// without changing its value: `e` becomes `E`, and an explicit `+` sign
/// is dropped or added.
fn respell_exponent(line: &str, key: &str, upper: bool) -> String {
    let start = line.find(key).unwrap() + key.len();
    let e = start + line[start..].find('e').unwrap();
    let mut out = line.to_string();
    if upper {
        out.replace_range(e..=e, "E");
    } else if line[e + 1..].starts_with('+') {
        out.replace_range(e + 1..e + 2, "");
    } else {
        out.insert(e + 1, '+');
    }
    out
}

/// Single-byte edits that parse back to the same value still break the
/// chain at the edited event.
#[test]
fn test_value_preserving_byte_edits_are_detected() {
    let ws = Workspace::new();
    let ledger = ws.ledger(ws.store());
    ledger.log_event("r1", StepReport::ok("s1")).unwrap();
    ledger
        .log_event(
            "r1",
            StepReport::ok("s2").with_details(details(json!({ "big": 1e300, "ctl": "\u{1a}" }))),
        )
        .unwrap();
    ledger.log_event("r1", StepReport::ok("s3")).unwrap();

    let path = ledger.audit_path("r1").unwrap();
    let original = read_lines(&path);
    assert!(original[1].contains(r#""ctl":"\u001a""#), "{}", original[1]);
    assert!(ChainVerifier::new().verify_file(&path).unwrap().valid);

    let edits = [
        ("exponent case", respell_exponent(&original[1], r#""big":"#, true)),
        ("exponent sign", respell_exponent(&original[1], r#""big":"#, false)),
        ("escape case", original[1].replace(r#"\u001a"#, r#"\u001A"#)),
        ("whitespace", original[1].replacen(r#""details":"#, r#""details": "#, 1)),
    ];
    for (label, edited) in edits {
        assert_ne!(edited, original[1], "{label}: edit did nothing");
        let reparsed: Value = serde_json::from_str(&edited).unwrap();
        assert_eq!(reparsed, serde_json::from_str::<Value>(&original[1]).unwrap());

        let mut lines = original.clone();
        lines[1] = edited;
        write_lines(&path, &lines);

        let report = ChainVerifier::new().verify_file(&path).unwrap();
        assert!(!report.valid, "{label}: edit went unnoticed");
        assert_eq!(report.break_index, Some(1), "{label}");
        assert_eq!(report.events, 1, "{label}");
        assert!(
            matches!(report.reason, Some(BreakReason::NonCanonical { .. })),
            "{label}: {:?}",
            report.reason
        );
    }
}

/// A line whose hash is self-consistent but which lacks the event fields
/// is not an event.
#[test]
fn test_partial_event_is_malformed() {
    let ws = Workspace::new();
    let path = ws.artifacts().join("r1").join("audit.jsonl");
    fs::create_dir_all(path.parent().unwrap()).unwrap();

    let mut body = json!({ "prev_event_hash": "", "run_id": "r1" });
    let hash = next_hash("", &canonical::encode_value(&body));
    body["event_hash"] = json!(hash);
    write_lines(&path, &[String::from_utf8(canonical::encode_value(&body)).unwrap()]);

    let report = ChainVerifier::new().verify_file(&path).unwrap();
    assert!(!report.valid);
    assert_eq!(report.break_index, Some(0));
    assert!(matches!(report.reason, Some(BreakReason::Malformed { .. })));
}

#[test]
fn test_empty_file_is_valid() {
    let ws = Workspace::new();
    let path = ws.artifacts().join("r1").join("audit.jsonl");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"").unwrap();

    let report = ChainVerifier::new().verify_file(&path).unwrap();
    assert!(report.valid);
    assert_eq!(report.events, 0);
    assert_eq!(report.break_index, None);
    assert_eq!(report.run_id, None);
}

#[test]
fn test_missing_file_is_an_error() {
    let ws = Workspace::new();
    let err = ChainVerifier::new()
        .verify_file(&ws.artifacts().join("ghost").join("audit.jsonl"))
        .unwrap_err();
    assert!(matches!(err, TrailError::AuditFileNotFound { .. }));
}

#[test]
fn test_restart_continues_the_chain() {
    let ws = Workspace::new();
    {
        let ledger = ws.ledger(ws.store());
        log_reference_run(&ledger);
    }

    // New connection, empty head cache.
    let store = ws.store();
    let ledger = ws.ledger(store.clone());
    let fourth = ledger.log_event("r1", StepReport::ok("s4")).unwrap();

    let path = ledger.audit_path("r1").unwrap();
    let lines = read_lines(&path);
    let third: Value = serde_json::from_str(&lines[2]).unwrap();
    assert_eq!(json!(fourth.prev_event_hash), third["event_hash"]);

    let report = ChainVerifier::new().verify_file(&path).unwrap();
    assert!(report.valid);
    assert_eq!(report.events, 4);
    assert_eq!(
        cross_check(&path, store.as_ref(), "r1").unwrap().status,
        SyncStatus::InSync
    );
}

#[test]
fn test_store_lag_is_detected_but_file_still_verifies() {
    let ws = Workspace::new();
    let store = ws.store();
    let ledger = ws.ledger(store.clone());
    log_reference_run(&ledger);
    let path = ledger.audit_path("r1").unwrap();

    // A correctly chained line that never reached the store.
    let last: Value = serde_json::from_str(read_lines(&path).last().unwrap()).unwrap();
    let mut orphan = last.clone();
    let fields = orphan.as_object_mut().unwrap();
    fields.remove("event_hash");
    fields.insert("step".to_string(), json!("s4"));
    fields.insert("prev_event_hash".to_string(), last["event_hash"].clone());
    let hash = next_hash(last["event_hash"].as_str().unwrap(), &canonical::encode_value(&orphan));
    orphan["event_hash"] = json!(hash);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&canonical::encode_value(&orphan)).unwrap();
    file.write_all(b"\n").unwrap();

    assert!(ChainVerifier::new().verify_file(&path).unwrap().valid);
    let sync = cross_check(&path, store.as_ref(), "r1").unwrap();
    assert_eq!(sync.status, SyncStatus::StoreLags { missing: 1 });
}

#[test]
fn test_interleaved_runs_verify_independently() {
    let ws = Workspace::new();
    let ledger = ws.ledger(ws.store());
    for i in 0..3 {
        ledger.log_event("run-a", StepReport::ok(format!("a{i}"))).unwrap();
        ledger.log_event("run-b", StepReport::ok(format!("b{i}"))).unwrap();
    }

    let verifier = ChainVerifier::new();
    for run_id in ["run-a", "run-b"] {
        let report = verifier.verify_file(&ledger.audit_path(run_id).unwrap()).unwrap();
        assert!(report.valid);
        assert_eq!(report.events, 3);
        assert_eq!(report.run_id.as_deref(), Some(run_id));
    }
}

#[test]
fn test_recorded_run_is_sealed_and_verifiable() {
    let ws = Workspace::new();
    let store = ws.store();
    let ledger = Arc::new(ws.ledger(store.clone()));
    let recorder = RunRecorder::new(ledger.clone(), store.clone());

    let run_id = recorder
        .start_run("https://jobs.example.com/123", details(json!({ "cfg_hash": "abc" })))
        .unwrap();
    recorder
        .record(&run_id, StepReport::ok("nav.load").with_detail("http_status", 200))
        .unwrap();
    recorder
        .record_artifact(&run_id, "placeholder", "placeholder.txt", &"0".repeat(64))
        .unwrap();
    let seal = recorder.finish_run(&run_id, RunStatus::Ok, None).unwrap();

    let path = ledger.audit_path(&run_id).unwrap();
    let report = ChainVerifier::new().verify_file(&path).unwrap();
    assert!(report.valid);
    assert!(report.sealed);
    assert_eq!(report.events, 5);
    assert_eq!(ledger.latest_hash(&run_id).unwrap(), seal.event_hash);

    let err = ledger.log_event(&run_id, StepReport::ok("late")).unwrap_err();
    assert!(matches!(err, TrailError::RunSealed { .. }));
    assert_eq!(read_lines(&path).len(), 5);
}

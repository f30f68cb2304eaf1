//! The run recorder: drives one run's lifecycle through the audit trail.
//!
//! Orchestrators that want the full lifecycle use this instead of calling
//! the ledger directly:
//!
//!   start_run → record* / record_artifact* → finish_run (→ seal)
//!
//! Every lifecycle transition is written to the chain, so the append file
//! alone shows when a run started, what it produced and how it ended.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use jobtrail_contracts::{
    error::TrailResult,
    event::{AuditEvent, Details, EventStatus, StepReport},
    run::{ArtifactRecord, RunStatus},
};

use crate::traits::{EventLog, RunRegistry};

/// Step name of the first event of every recorded run.
pub const RUN_STARTED_STEP: &str = "run_started";

/// Step name of the event written when a run reaches its terminal status.
pub const RUN_FINISHED_STEP: &str = "run_finished";

/// Couples an `EventLog` with a `RunRegistry`.
///
/// One recorder serves any number of runs; it holds no per-run state.
pub struct RunRecorder {
    log: Arc<dyn EventLog>,
    registry: Arc<dyn RunRegistry>,
}

impl RunRecorder {
    pub fn new(log: Arc<dyn EventLog>, registry: Arc<dyn RunRegistry>) -> Self {
        Self { log, registry }
    }

    /// Register a run for `url` and write its `run_started` event.
    ///
    /// `extra` is merged into the event details; the `url` key is reserved.
    pub fn start_run(&self, url: &str, extra: Details) -> TrailResult<String> {
        let run_id = self.registry.create_run(url)?;

        let mut details = extra;
        details.insert("url".to_string(), Value::String(url.to_string()));
        self.log
            .log_event(&run_id, StepReport::ok(RUN_STARTED_STEP).with_details(details))?;

        info!(run_id = %run_id, url = %url, "run started");
        Ok(run_id)
    }

    /// Record one step outcome.
    pub fn record(&self, run_id: &str, report: StepReport) -> TrailResult<AuditEvent> {
        debug!(run_id = %run_id, step = %report.step, status = %report.status, "recording step");
        self.log.log_event(run_id, report)
    }

    /// Register an artifact and write an `artifact.<kind>` event whose
    /// `output_digest` is the artifact's digest.
    pub fn record_artifact(
        &self,
        run_id: &str,
        kind: &str,
        path: &str,
        sha256: &str,
    ) -> TrailResult<(ArtifactRecord, AuditEvent)> {
        let artifact = self.registry.record_artifact(run_id, kind, path, sha256)?;

        let report = StepReport::ok(format!("artifact.{kind}"))
            .with_detail("kind", kind)
            .with_detail("path", path)
            .with_detail("sha256", sha256)
            .with_output_digest(sha256)
            .with_artifact(path);
        let event = self.log.log_event(run_id, report)?;

        Ok((artifact, event))
    }

    /// Close a run: update the registry, write `run_finished`, then seal.
    ///
    /// Returns the seal event, the last link of the run's chain.
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> TrailResult<AuditEvent> {
        self.registry.finish_run(run_id, status, error_message)?;

        let event_status = if status == RunStatus::Error {
            EventStatus::Error
        } else {
            EventStatus::Ok
        };
        let mut report =
            StepReport::new(RUN_FINISHED_STEP, event_status).with_detail("status", status.as_str());
        if let Some(message) = error_message {
            report = report.with_detail("error", message);
        }
        self.log.log_event(run_id, report)?;

        let mut seal_details = Details::new();
        seal_details.insert("status".to_string(), Value::String(status.as_str().to_string()));
        let seal = self.log.seal(run_id, seal_details)?;

        info!(
            run_id = %run_id,
            status = %status,
            terminal_hash = %seal.event_hash,
            "run finished and sealed"
        );
        Ok(seal)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use jobtrail_contracts::{
        error::{TrailError, TrailResult},
        event::{AuditEvent, Details, EventStatus, StepReport, SEAL_STEP},
        run::{ArtifactRecord, RunRecord, RunStatus},
    };

    use crate::traits::{EventLog, RunRegistry};

    use super::{RunRecorder, RUN_FINISHED_STEP, RUN_STARTED_STEP};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// An event log that records every call and fabricates hashes.
    #[derive(Default)]
    struct MockLog {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl MockLog {
        fn push(&self, run_id: &str, report: StepReport) -> AuditEvent {
            let mut events = self.events.lock().unwrap();
            let event = AuditEvent {
                run_id: run_id.to_string(),
                step: report.step,
                status: report.status,
                ts_iso: "2026-01-01T00:00:00Z".to_string(),
                ts_ns: events.len() as u64,
                input_digest: report.input_digest,
                output_digest: report.output_digest,
                artifact_paths: report.artifact_paths,
                details: report.details,
                prev_event_hash: events.last().map(|e| e.event_hash.clone()).unwrap_or_default(),
                event_hash: format!("hash-{}", events.len()),
            };
            events.push(event.clone());
            event
        }
    }

    impl EventLog for MockLog {
        fn log_event(&self, run_id: &str, report: StepReport) -> TrailResult<AuditEvent> {
            Ok(self.push(run_id, report))
        }

        fn seal(&self, run_id: &str, details: Details) -> TrailResult<AuditEvent> {
            Ok(self.push(run_id, StepReport::ok(SEAL_STEP).with_details(details)))
        }
    }

    /// A registry backed by vectors.
    #[derive(Default)]
    struct MockRegistry {
        runs: Mutex<Vec<RunRecord>>,
        artifacts: Mutex<Vec<ArtifactRecord>>,
    }

    impl RunRegistry for MockRegistry {
        fn create_run(&self, url: &str) -> TrailResult<String> {
            let mut runs = self.runs.lock().unwrap();
            let run_id = format!("run-{}", runs.len());
            runs.push(RunRecord {
                run_id: run_id.clone(),
                url: url.to_string(),
                started_at: "2026-01-01T00:00:00+00:00".to_string(),
                finished_at: None,
                status: RunStatus::Running,
                error_message: None,
            });
            Ok(run_id)
        }

        fn finish_run(
            &self,
            run_id: &str,
            status: RunStatus,
            error_message: Option<&str>,
        ) -> TrailResult<()> {
            let mut runs = self.runs.lock().unwrap();
            let run = runs
                .iter_mut()
                .find(|r| r.run_id == run_id)
                .ok_or_else(|| TrailError::RunNotFound {
                    run_id: run_id.to_string(),
                })?;
            run.status = status;
            run.error_message = error_message.map(str::to_string);
            run.finished_at = Some("2026-01-01T00:01:00+00:00".to_string());
            Ok(())
        }

        fn get_run(&self, run_id: &str) -> TrailResult<Option<RunRecord>> {
            Ok(self.runs.lock().unwrap().iter().find(|r| r.run_id == run_id).cloned())
        }

        fn record_artifact(
            &self,
            run_id: &str,
            kind: &str,
            path: &str,
            sha256: &str,
        ) -> TrailResult<ArtifactRecord> {
            let mut artifacts = self.artifacts.lock().unwrap();
            let record = ArtifactRecord {
                id: artifacts.len() as u64 + 1,
                run_id: run_id.to_string(),
                kind: kind.to_string(),
                path: path.to_string(),
                sha256: sha256.to_string(),
                created_at: "2026-01-01T00:00:30+00:00".to_string(),
            };
            artifacts.push(record.clone());
            Ok(record)
        }

        fn artifacts_for_run(&self, run_id: &str) -> TrailResult<Vec<ArtifactRecord>> {
            Ok(self
                .artifacts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.run_id == run_id)
                .cloned()
                .collect())
        }
    }

    fn recorder() -> (RunRecorder, Arc<MockLog>, Arc<MockRegistry>) {
        let log = Arc::new(MockLog::default());
        let registry = Arc::new(MockRegistry::default());
        (RunRecorder::new(log.clone(), registry.clone()), log, registry)
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[test]
    fn test_start_run_registers_and_logs_run_started() {
        let (recorder, log, registry) = recorder();
        let mut extra = Details::new();
        extra.insert("cfg_hash".to_string(), json!("abc"));
        extra.insert("url".to_string(), json!("spoofed"));

        let run_id = recorder.start_run("https://jobs.example/1", extra).unwrap();

        let events = log.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_id, run_id);
        assert_eq!(events[0].step, RUN_STARTED_STEP);
        assert_eq!(events[0].details["url"], json!("https://jobs.example/1"));
        assert_eq!(events[0].details["cfg_hash"], json!("abc"));
        assert_eq!(
            registry.get_run(&run_id).unwrap().unwrap().status,
            RunStatus::Running
        );
    }

    #[test]
    fn test_record_artifact_logs_digest_and_path() {
        let (recorder, log, registry) = recorder();
        let run_id = recorder.start_run("https://jobs.example/2", Details::new()).unwrap();

        let (artifact, event) = recorder
            .record_artifact(&run_id, "screenshot", "artifacts/x/page.png", "feed")
            .unwrap();

        assert_eq!(artifact.kind, "screenshot");
        assert_eq!(event.step, "artifact.screenshot");
        assert_eq!(event.output_digest.as_deref(), Some("feed"));
        assert_eq!(event.artifact_paths, vec!["artifacts/x/page.png"]);
        assert_eq!(registry.artifacts_for_run(&run_id).unwrap().len(), 1);
        assert_eq!(log.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_finish_run_writes_finished_then_seal() {
        let (recorder, log, registry) = recorder();
        let run_id = recorder.start_run("https://jobs.example/3", Details::new()).unwrap();
        recorder.record(&run_id, StepReport::ok("dom.extract")).unwrap();

        let seal = recorder
            .finish_run(&run_id, RunStatus::Error, Some("navigation timeout"))
            .unwrap();

        let events = log.events.lock().unwrap();
        let steps: Vec<&str> = events.iter().map(|e| e.step.as_str()).collect();
        assert_eq!(steps, vec![RUN_STARTED_STEP, "dom.extract", RUN_FINISHED_STEP, SEAL_STEP]);
        assert_eq!(events[2].status, EventStatus::Error);
        assert_eq!(events[2].details["error"], json!("navigation timeout"));
        assert_eq!(seal.details["status"], json!("error"));

        let run = registry.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.error_message.as_deref(), Some("navigation timeout"));
    }

    #[test]
    fn test_finish_unknown_run_fails_before_logging() {
        let (recorder, log, _registry) = recorder();
        let err = recorder.finish_run("missing", RunStatus::Ok, None).unwrap_err();
        assert!(matches!(err, TrailError::RunNotFound { .. }));
        assert!(log.events.lock().unwrap().is_empty());
    }
}

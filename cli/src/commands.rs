//! Subcommand implementations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use jobtrail_audit::{sha256_file, AppendFileSink, AuditLedger};
use jobtrail_config::TrailConfig;
use jobtrail_contracts::{
    error::{TrailError, TrailResult},
    event::{Details, EventStatus, StepReport},
    run::RunStatus,
};
use jobtrail_core::{canonical, traits::EventLog, RunRecorder};
use jobtrail_store::SqliteStore;
use jobtrail_verify::{cross_check, ChainVerifier};

use crate::Command;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NOT_FOUND: u8 = 2;

/// Run `command` and return the process exit code.
pub fn run(command: Command, config: &TrailConfig) -> u8 {
    let result = match command {
        Command::Verify { run } => verify(&run, config),
        Command::CrossCheck { run } => cross_check_run(&run, config),
        Command::Log {
            run,
            step,
            status,
            details,
            input_digest,
            output_digest,
            artifacts,
        } => {
            let mut report = StepReport::new(step, status);
            report.input_digest = input_digest;
            report.output_digest = output_digest;
            report.artifact_paths = artifacts;
            log(&run, report, details.as_deref(), config)
        }
        Command::Seal { run } => seal(&run, config),
        Command::Bootstrap { url } => bootstrap(&url, config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("jobtrail: {e}");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(err: &TrailError) -> u8 {
    match err {
        TrailError::AuditFileNotFound { .. } | TrailError::RunNotFound { .. } => EXIT_NOT_FOUND,
        _ => EXIT_FAILURE,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> TrailResult<()> {
    println!("{}", canonical::encode_to_string(value)?);
    Ok(())
}

fn open_ledger(config: &TrailConfig) -> TrailResult<(Arc<SqliteStore>, Arc<AuditLedger>)> {
    let store = Arc::new(SqliteStore::open(&config.store.path, config.busy_timeout())?);
    let ledger = Arc::new(AuditLedger::new(store.clone(), config.audit_sink()));
    Ok((store, ledger))
}

/// Resolve a `verify` target: an existing file is used as is, a directory
/// holds the append file, anything else is a run id.
pub fn resolve_audit_path(target: &str, sink: &AppendFileSink) -> TrailResult<PathBuf> {
    let path = Path::new(target);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        return Ok(path.join(sink.file_name()));
    }
    sink.path_for(target).map_err(|_| TrailError::AuditFileNotFound {
        path: target.to_string(),
    })
}

// ── verify ───────────────────────────────────────────────────────────────────

fn verify(target: &str, config: &TrailConfig) -> TrailResult<u8> {
    let sink = config.audit_sink();
    let verified = resolve_audit_path(target, &sink)
        .and_then(|path| ChainVerifier::new().verify_file(&path));

    match verified {
        Ok(report) => {
            print_json(&report)?;
            Ok(if report.valid { EXIT_OK } else { EXIT_FAILURE })
        }
        Err(TrailError::AuditFileNotFound { path }) => {
            print_json(&json!({
                "error": "audit file not found",
                "path": path,
                "valid": false,
            }))?;
            Ok(EXIT_NOT_FOUND)
        }
        Err(e) => Err(e),
    }
}

// ── cross-check ──────────────────────────────────────────────────────────────

fn cross_check_run(run_id: &str, config: &TrailConfig) -> TrailResult<u8> {
    let path = config.audit_sink().path_for(run_id)?;
    let store = SqliteStore::open(&config.store.path, config.busy_timeout())?;
    let report = cross_check(&path, &store, run_id)?;

    print_json(&report)?;
    Ok(if report.status.is_in_sync() {
        EXIT_OK
    } else {
        EXIT_FAILURE
    })
}

// ── log / seal ───────────────────────────────────────────────────────────────

/// Parse `--details`; it must be a JSON object.
fn parse_details(raw: Option<&str>) -> TrailResult<Details> {
    let Some(raw) = raw else {
        return Ok(Details::new());
    };
    let value: Value = serde_json::from_str(raw).map_err(|e| TrailError::Encoding {
        reason: format!("--details is not valid JSON: {e}"),
    })?;
    canonical::to_details(&value)
}

fn log(
    run_id: &str,
    report: StepReport,
    details: Option<&str>,
    config: &TrailConfig,
) -> TrailResult<u8> {
    let report = report.with_details(parse_details(details)?);
    let (_, ledger) = open_ledger(config)?;
    let event = ledger.log_event(run_id, report)?;
    print_json(&event)?;
    Ok(EXIT_OK)
}

fn seal(run_id: &str, config: &TrailConfig) -> TrailResult<u8> {
    let (_, ledger) = open_ledger(config)?;
    let event = ledger.seal(run_id, Details::new())?;
    print_json(&event)?;
    Ok(EXIT_OK)
}

// ── bootstrap ────────────────────────────────────────────────────────────────

fn bootstrap(url: &str, config: &TrailConfig) -> TrailResult<u8> {
    let (store, ledger) = open_ledger(config)?;
    let recorder = RunRecorder::new(ledger.clone(), store.clone());

    let mut extra = Details::new();
    extra.insert("cfg_hash".to_string(), Value::String(config.cfg_hash()?));
    let run_id = recorder.start_run(url, extra)?;

    if let Err(e) = write_placeholder(&recorder, ledger.sink(), &run_id) {
        let message = e.to_string();
        // The original failure is what the caller needs; a failure to close
        // the run is logged only.
        let failed = StepReport::new("run_failed", EventStatus::Error)
            .with_detail("error_message", message.as_str());
        if let Err(close) = recorder
            .record(&run_id, failed)
            .and_then(|_| recorder.finish_run(&run_id, RunStatus::Error, Some(&message)))
        {
            error!(run_id = %run_id, error = %close, "could not close failed run");
        }
        return Err(e);
    }
    recorder.finish_run(&run_id, RunStatus::Ok, None)?;

    let audit_path = ledger.audit_path(&run_id)?;
    let report = ChainVerifier::new().verify_file(&audit_path)?;
    info!(run_id = %run_id, events = report.events, "bootstrap run complete");

    print_json(&json!({
        "audit_path": audit_path.display().to_string(),
        "events": report.events,
        "run_id": run_id,
    }))?;
    Ok(EXIT_OK)
}

fn write_placeholder(
    recorder: &RunRecorder,
    sink: &AppendFileSink,
    run_id: &str,
) -> TrailResult<()> {
    let run_dir = sink.run_dir(run_id)?;
    let path = run_dir.join("placeholder.txt");
    fs::create_dir_all(&run_dir)
        .and_then(|()| fs::write(&path, "bootstrap placeholder\n"))
        .map_err(|e| TrailError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let sha256 = sha256_file(&path)?;
    recorder.record_artifact(run_id, "placeholder", &path.display().to_string(), &sha256)?;
    Ok(())
}

//! SQLite-backed `AuditStore` and `RunRegistry`.
//!
//! Three tables live in one database file:
//!
//! - `runs`      — one row per run, keyed by run id
//! - `artifacts` — files produced by runs, with their digests
//! - `audit`     — one row per audit event; `id` is the append sequence
//!
//! Chain recovery orders `audit` rows by `id`, never by timestamp, so clock
//! skew between processes cannot reorder a chain.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use jobtrail_contracts::{
    error::{TrailError, TrailResult},
    event::{AuditEvent, ChainHead, Details, EventStatus, SEAL_STEP},
    run::{ArtifactRecord, RunRecord, RunStatus},
};
use jobtrail_core::{
    canonical,
    traits::{AuditStore, RecoverySource, RunRegistry},
};

/// Default time a writer waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id        TEXT PRIMARY KEY,
    url           TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    finished_at   TEXT,
    status        TEXT NOT NULL,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS artifacts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id     TEXT NOT NULL,
    kind       TEXT NOT NULL,
    path       TEXT NOT NULL,
    sha256     TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_artifacts_run ON artifacts (run_id, id);

CREATE TABLE IF NOT EXISTS audit (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT NOT NULL,
    step            TEXT NOT NULL,
    status          TEXT NOT NULL,
    ts_iso          TEXT NOT NULL,
    ts_ns           INTEGER NOT NULL,
    input_digest    TEXT,
    output_digest   TEXT,
    artifact_paths  TEXT NOT NULL,
    details_json    TEXT NOT NULL,
    prev_event_hash TEXT NOT NULL,
    event_hash      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_run ON audit (run_id, id);
";

fn db_err(e: rusqlite::Error) -> TrailError {
    TrailError::store(e.to_string())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// An `audit` row as read from the database, before decoding.
struct AuditRow {
    run_id: String,
    step: String,
    status: String,
    ts_iso: String,
    ts_ns: i64,
    input_digest: Option<String>,
    output_digest: Option<String>,
    artifact_paths: String,
    details_json: String,
    prev_event_hash: String,
    event_hash: String,
}

impl AuditRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            step: row.get(1)?,
            status: row.get(2)?,
            ts_iso: row.get(3)?,
            ts_ns: row.get(4)?,
            input_digest: row.get(5)?,
            output_digest: row.get(6)?,
            artifact_paths: row.get(7)?,
            details_json: row.get(8)?,
            prev_event_hash: row.get(9)?,
            event_hash: row.get(10)?,
        })
    }

    fn into_event(self) -> TrailResult<AuditEvent> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            TrailError::store(format!("corrupt audit row '{}': {what}: {e}", self.event_hash))
        };

        let status: EventStatus = self.status.parse().map_err(|e| corrupt("status", &e))?;
        let ts_ns = u64::try_from(self.ts_ns).map_err(|e| corrupt("ts_ns", &e))?;
        let artifact_paths: Vec<String> =
            serde_json::from_str(&self.artifact_paths).map_err(|e| corrupt("artifact_paths", &e))?;
        let details: Details =
            serde_json::from_str(&self.details_json).map_err(|e| corrupt("details", &e))?;

        Ok(AuditEvent {
            run_id: self.run_id,
            step: self.step,
            status,
            ts_iso: self.ts_iso,
            ts_ns,
            input_digest: self.input_digest,
            output_digest: self.output_digest,
            artifact_paths,
            details,
            prev_event_hash: self.prev_event_hash,
            event_hash: self.event_hash,
        })
    }
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(RunRecord, String)> {
    // Status is decoded by the caller so a bad value surfaces as a
    // `TrailError` instead of a rusqlite conversion error.
    let status: String = row.get(4)?;
    Ok((
        RunRecord {
            run_id: row.get(0)?,
            url: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            status: RunStatus::Running,
            error_message: row.get(5)?,
        },
        status,
    ))
}

fn artifact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.get::<_, i64>(0)? as u64,
        run_id: row.get(1)?,
        kind: row.get(2)?,
        path: row.get(3)?,
        sha256: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── Store ────────────────────────────────────────────────────────────────────

/// The durable store, shareable across threads.
///
/// Cloning is cheap and every clone shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database at `path` in WAL mode.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> TrailResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TrailError::Io {
                path: parent.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(busy_timeout).map_err(db_err)?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(db_err)?;
        Self::initialize(&conn)?;

        info!(path = %path.display(), journal_mode = %mode, "opened audit store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private in-memory database, gone when the last clone is dropped.
    pub fn in_memory() -> TrailResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn initialize(conn: &Connection) -> TrailResult<()> {
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)
    }

    /// Database file, `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of `audit` rows for `run_id`.
    pub fn event_count(&self, run_id: &str) -> TrailResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM audit WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }

    fn require_run(conn: &Connection, run_id: &str) -> TrailResult<()> {
        let exists = conn
            .query_row(
                "SELECT 1 FROM runs WHERE run_id = ?1",
                params![run_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?;
        exists.ok_or_else(|| TrailError::RunNotFound {
            run_id: run_id.to_string(),
        })
    }
}

impl RecoverySource for SqliteStore {
    fn latest_head(&self, run_id: &str) -> TrailResult<Option<ChainHead>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT step, event_hash FROM audit WHERE run_id = ?1 ORDER BY id DESC LIMIT 1",
                params![run_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|e| TrailError::Recovery {
                run_id: run_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(row.map(|(step, event_hash)| ChainHead {
            event_hash,
            sealed: step == SEAL_STEP,
        }))
    }
}

impl AuditStore for SqliteStore {
    fn append_event(
        &self,
        event: &AuditEvent,
        commit_gate: &mut dyn FnMut(&AuditEvent) -> TrailResult<()>,
    ) -> TrailResult<u64> {
        let details = String::from_utf8(canonical::encode_value(&Value::Object(
            event.details.clone(),
        )))
        .map_err(|e| TrailError::store(format!("details are not UTF-8: {e}")))?;
        let artifact_paths = String::from_utf8(canonical::encode(&event.artifact_paths)?)
            .map_err(|e| TrailError::store(format!("artifact paths are not UTF-8: {e}")))?;
        let ts_ns = i64::try_from(event.ts_ns)
            .map_err(|e| TrailError::store(format!("ts_ns out of range: {e}")))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO audit (run_id, step, status, ts_iso, ts_ns, input_digest, output_digest,
                                artifact_paths, details_json, prev_event_hash, event_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.run_id,
                event.step,
                event.status.as_str(),
                event.ts_iso,
                ts_ns,
                event.input_digest,
                event.output_digest,
                artifact_paths,
                details,
                event.prev_event_hash,
                event.event_hash,
            ],
        )
        .map_err(db_err)?;
        let id = tx.last_insert_rowid() as u64;

        // The connection stays locked through the gate, so gated appends are
        // serialized process-wide. Dropping `tx` on a gate error rolls the
        // row back.
        commit_gate(event)?;
        tx.commit().map_err(db_err)?;

        debug!(run_id = %event.run_id, id, event_hash = %event.event_hash, "audit row committed");
        Ok(id)
    }

    fn events_for_run(&self, run_id: &str) -> TrailResult<Vec<AuditEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT run_id, step, status, ts_iso, ts_ns, input_digest, output_digest,
                        artifact_paths, details_json, prev_event_hash, event_hash
                 FROM audit WHERE run_id = ?1 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id], AuditRow::from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        rows.into_iter().map(AuditRow::into_event).collect()
    }
}

impl RunRegistry for SqliteStore {
    fn create_run(&self, url: &str) -> TrailResult<String> {
        let run_id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (run_id, url, started_at, finished_at, status, error_message)
             VALUES (?1, ?2, ?3, NULL, ?4, NULL)",
            params![run_id, url, now_rfc3339(), RunStatus::Running.as_str()],
        )
        .map_err(db_err)?;

        info!(run_id = %run_id, url = %url, "run created");
        Ok(run_id)
    }

    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> TrailResult<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE run_id = ?4",
                params![now_rfc3339(), status.as_str(), error_message, run_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(TrailError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        info!(run_id = %run_id, status = %status, "run finished");
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> TrailResult<Option<RunRecord>> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT run_id, url, started_at, finished_at, status, error_message
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()
            .map_err(db_err)?;

        found
            .map(|(mut record, status)| -> TrailResult<RunRecord> {
                record.status = status.parse()?;
                Ok(record)
            })
            .transpose()
    }

    fn record_artifact(
        &self,
        run_id: &str,
        kind: &str,
        path: &str,
        sha256: &str,
    ) -> TrailResult<ArtifactRecord> {
        let conn = self.conn.lock();
        Self::require_run(&conn, run_id)?;

        let created_at = now_rfc3339();
        conn.execute(
            "INSERT INTO artifacts (run_id, kind, path, sha256, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, kind, path, sha256, created_at],
        )
        .map_err(db_err)?;

        Ok(ArtifactRecord {
            id: conn.last_insert_rowid() as u64,
            run_id: run_id.to_string(),
            kind: kind.to_string(),
            path: path.to_string(),
            sha256: sha256.to_string(),
            created_at,
        })
    }

    fn artifacts_for_run(&self, run_id: &str) -> TrailResult<Vec<ArtifactRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, run_id, kind, path, sha256, created_at
                 FROM artifacts WHERE run_id = ?1 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let artifacts = stmt
            .query_map(params![run_id], artifact_from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(artifacts)
    }
}

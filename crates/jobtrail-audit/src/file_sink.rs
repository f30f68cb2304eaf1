//! The per-run append file.
//!
//! Layout: `<base_dir>/<run_id>/<file_name>`, one canonically encoded event
//! per line, `\n` terminated. The file is only ever opened in append mode;
//! nothing here rewrites or truncates it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use jobtrail_contracts::{
    error::{TrailError, TrailResult},
    event::AuditEvent,
};
use jobtrail_core::canonical;

/// Default name of the append file inside a run directory.
pub const DEFAULT_AUDIT_FILE: &str = "audit.jsonl";

const MAX_RUN_ID_LEN: usize = 255;

/// Reject run ids that are empty or cannot safely name a directory.
pub fn validate_run_id(run_id: &str) -> TrailResult<()> {
    let reason = if run_id.is_empty() {
        Some("run id must not be empty".to_string())
    } else if run_id == "." || run_id == ".." {
        Some(format!("run id '{run_id}' is a relative path component"))
    } else if run_id.contains(['/', '\\', '\0']) {
        Some(format!("run id '{run_id}' contains a path separator or NUL"))
    } else if run_id.len() > MAX_RUN_ID_LEN {
        Some(format!("run id is longer than {MAX_RUN_ID_LEN} bytes"))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TrailError::InvalidRunId { reason }),
        None => Ok(()),
    }
}

/// Writes events to `<base_dir>/<run_id>/<file_name>`.
#[derive(Debug, Clone)]
pub struct AppendFileSink {
    base_dir: PathBuf,
    file_name: String,
}

impl AppendFileSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_name: DEFAULT_AUDIT_FILE.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Directory holding a run's append file and artifacts.
    pub fn run_dir(&self, run_id: &str) -> TrailResult<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.base_dir.join(run_id))
    }

    /// Path of a run's append file. Does not touch the filesystem.
    pub fn path_for(&self, run_id: &str) -> TrailResult<PathBuf> {
        Ok(self.run_dir(run_id)?.join(&self.file_name))
    }

    /// Append one pre-encoded line and flush it to stable storage.
    ///
    /// The line and its terminator go out in a single write so concurrent
    /// appenders to other runs never interleave within a line.
    pub fn append_line(&self, run_id: &str, line: &[u8]) -> TrailResult<()> {
        let dir = self.run_dir(run_id)?;
        fs::create_dir_all(&dir).map_err(|e| {
            TrailError::append_file(format!("cannot create '{}': {e}", dir.display()))
        })?;

        let path = dir.join(&self.file_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrailError::append_file(format!("cannot open '{}': {e}", path.display())))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        file.write_all(&buf)
            .and_then(|()| file.sync_data())
            .map_err(|e| TrailError::append_file(format!("cannot append to '{}': {e}", path.display())))
    }

    /// Canonically encode `event` and append it.
    pub fn append(&self, event: &AuditEvent) -> TrailResult<()> {
        let line = canonical::encode(event)?;
        self.append_line(&event.run_id, &line)
    }
}

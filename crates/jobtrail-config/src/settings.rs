//! Configuration schema.
//!
//! Every section and field is optional; a missing file section falls back to
//! the defaults below.
//!
//! ```toml
//! [artifacts]
//! base_dir = "artifacts"
//! audit_file = "audit.jsonl"
//!
//! [store]
//! path = "automation.db"
//! busy_timeout_ms = 5000
//!
//! [logging]
//! filter = "warn"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use jobtrail_audit::{sha256_bytes, AppendFileSink, DEFAULT_AUDIT_FILE};
use jobtrail_contracts::error::{TrailError, TrailResult};
use jobtrail_core::canonical;

/// Where run directories and their append files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactsConfig {
    /// Parent of every `<run_id>/` directory.
    pub base_dir: PathBuf,
    /// Name of the append file inside a run directory.
    pub audit_file: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("artifacts"),
            audit_file: DEFAULT_AUDIT_FILE.to_string(),
        }
    }
}

/// The SQLite database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// How long a writer waits on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("automation.db"),
            busy_timeout_ms: 5000,
        }
    }
}

/// Diagnostic output on stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive, used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON log lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrailConfig {
    pub artifacts: ArtifactsConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl TrailConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `TrailError::Config` if the TOML is malformed, has unknown
    /// keys, or names an invalid append file.
    pub fn from_toml_str(s: &str) -> TrailResult<Self> {
        let config: TrailConfig = toml::from_str(s).map_err(|e| TrailError::Config {
            reason: format!("failed to parse config TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the file at `path`. Relative paths inside it are
    /// resolved against the file's directory.
    pub fn from_file(path: &Path) -> TrailResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TrailError::Config {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;
        let root = path.parent().unwrap_or_else(|| Path::new(""));
        let config = Self::from_toml_str(&contents)?.resolve(root);
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Make relative `base_dir` and store `path` relative to `root`.
    pub fn resolve(mut self, root: &Path) -> Self {
        if self.artifacts.base_dir.is_relative() {
            self.artifacts.base_dir = root.join(&self.artifacts.base_dir);
        }
        if self.store.path.is_relative() {
            self.store.path = root.join(&self.store.path);
        }
        self
    }

    fn validate(&self) -> TrailResult<()> {
        let name = &self.artifacts.audit_file;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
            return Err(TrailError::Config {
                reason: format!("artifacts.audit_file '{name}' must be a plain file name"),
            });
        }
        Ok(())
    }

    /// SHA-256 of the canonical encoding of this configuration.
    ///
    /// Two configurations that differ in any value have different hashes;
    /// key order and formatting of the source TOML do not matter.
    pub fn cfg_hash(&self) -> TrailResult<String> {
        Ok(sha256_bytes(&canonical::encode(self)?))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    /// The append-file sink described by `[artifacts]`.
    pub fn audit_sink(&self) -> AppendFileSink {
        AppendFileSink::new(&self.artifacts.base_dir).with_file_name(&self.artifacts.audit_file)
    }
}

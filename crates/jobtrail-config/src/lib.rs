//! # jobtrail-config
//!
//! TOML configuration for the jobtrail binary and embedders.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use jobtrail_config::TrailConfig;
//!
//! let config = TrailConfig::from_file(Path::new("jobtrail.toml"))?;
//! let sink = config.audit_sink();
//! let fingerprint = config.cfg_hash()?;
//! ```

pub mod settings;

pub use settings::{ArtifactsConfig, LoggingConfig, StoreConfig, TrailConfig};

// ── Tests ────────────────────────────────────────────────────────────────────

//! # jobtrail-core
//!
//! The pieces of the audit trail every other crate builds on.
//!
//! This crate provides:
//! - The canonical encoder (`canonical`) that all hashing and persistence use
//! - The storage and logging traits (`RecoverySource`, `AuditStore`,
//!   `RunRegistry`, `EventLog`, `Clock`)
//! - `RunRecorder`, which drives a run's lifecycle through an `EventLog`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jobtrail_core::{canonical, RunRecorder};
//!
//! let bytes = canonical::encode(&serde_json::json!({ "b": 1, "a": 2 }))?;
//! assert_eq!(bytes, br#"{"a":2,"b":1}"#);
//! ```

pub mod canonical;
pub mod clock;
pub mod recorder;
pub mod traits;

pub use clock::{FixedClock, SystemClock};
pub use recorder::RunRecorder;

//! Audit event types.
//!
//! `AuditEvent` is one immutable link in a run's hash chain. `EventBody` is
//! the same record minus `event_hash`: exactly the fields the hash commits
//! to. `StepReport` is what an orchestrator hands to the ledger.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TrailError;

/// Step name of the terminal event that closes a run's chain.
pub const SEAL_STEP: &str = "run.sealed";

/// Caller-supplied structured payload of an event.
pub type Details = Map<String, Value>;

/// Outcome reported for a step. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Ok,
    Error,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            other => Err(TrailError::Encoding {
                reason: format!("unknown event status '{other}' (expected 'ok' or 'error')"),
            }),
        }
    }
}

/// Every field of an audit event except `event_hash`.
///
/// The canonical encoding of this struct, prefixed by the bytes of
/// `prev_event_hash`, is what `event_hash` is computed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub run_id: String,
    pub step: String,
    pub status: EventStatus,
    /// UTC wall clock, second precision, `Z` suffix. Display only.
    pub ts_iso: String,
    /// Monotonic nanoseconds. Display and debugging only, never ordering.
    pub ts_ns: u64,
    pub input_digest: Option<String>,
    pub output_digest: Option<String>,
    pub artifact_paths: Vec<String>,
    pub details: Details,
    /// `event_hash` of the previous event of the same run, or `""`.
    pub prev_event_hash: String,
}

/// One immutable entry in a run's hash chain.
///
/// Modifying any field invalidates `event_hash` and every later
/// `prev_event_hash`, which the chain verifier detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub run_id: String,
    pub step: String,
    pub status: EventStatus,
    pub ts_iso: String,
    pub ts_ns: u64,
    pub input_digest: Option<String>,
    pub output_digest: Option<String>,
    pub artifact_paths: Vec<String>,
    pub details: Details,
    pub prev_event_hash: String,
    /// SHA-256 (lowercase hex) over `prev_event_hash` and the canonical body.
    pub event_hash: String,
}

impl AuditEvent {
    /// Attach a computed hash to a body.
    pub fn from_parts(body: EventBody, event_hash: String) -> Self {
        Self {
            run_id: body.run_id,
            step: body.step,
            status: body.status,
            ts_iso: body.ts_iso,
            ts_ns: body.ts_ns,
            input_digest: body.input_digest,
            output_digest: body.output_digest,
            artifact_paths: body.artifact_paths,
            details: body.details,
            prev_event_hash: body.prev_event_hash,
            event_hash,
        }
    }

    /// The hashed portion of this event.
    pub fn body(&self) -> EventBody {
        EventBody {
            run_id: self.run_id.clone(),
            step: self.step.clone(),
            status: self.status,
            ts_iso: self.ts_iso.clone(),
            ts_ns: self.ts_ns,
            input_digest: self.input_digest.clone(),
            output_digest: self.output_digest.clone(),
            artifact_paths: self.artifact_paths.clone(),
            details: self.details.clone(),
            prev_event_hash: self.prev_event_hash.clone(),
        }
    }

    /// True for the terminal event written by a seal.
    pub fn is_seal(&self) -> bool {
        self.step == SEAL_STEP
    }
}

/// A step outcome as reported by the orchestrator.
///
/// ```rust,ignore
/// let report = StepReport::ok("dom.extract")
///     .with_detail("fields", 7)
///     .with_output_digest(digest);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    pub status: EventStatus,
    #[serde(default)]
    pub details: Details,
    #[serde(default)]
    pub input_digest: Option<String>,
    #[serde(default)]
    pub output_digest: Option<String>,
    #[serde(default)]
    pub artifact_paths: Vec<String>,
}

impl StepReport {
    pub fn new(step: impl Into<String>, status: EventStatus) -> Self {
        Self {
            step: step.into(),
            status,
            details: Details::new(),
            input_digest: None,
            output_digest: None,
            artifact_paths: Vec::new(),
        }
    }

    pub fn ok(step: impl Into<String>) -> Self {
        Self::new(step, EventStatus::Ok)
    }

    pub fn error(step: impl Into<String>) -> Self {
        Self::new(step, EventStatus::Error)
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_input_digest(mut self, digest: impl Into<String>) -> Self {
        self.input_digest = Some(digest.into());
        self
    }

    pub fn with_output_digest(mut self, digest: impl Into<String>) -> Self {
        self.output_digest = Some(digest.into());
        self
    }

    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifact_paths.push(path.into());
        self
    }
}

/// The most recent link of a run's chain, as the ledger needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    /// `event_hash` of the latest event, `""` for a run with no events.
    pub event_hash: String,
    /// Whether the latest event is a seal.
    pub sealed: bool,
}

impl ChainHead {
    /// Head of a run that has no events yet.
    pub fn genesis() -> Self {
        Self {
            event_hash: String::new(),
            sealed: false,
        }
    }

    /// Head positioned after `event`.
    pub fn after(event: &AuditEvent) -> Self {
        Self {
            event_hash: event.event_hash.clone(),
            sealed: event.is_seal(),
        }
    }
}

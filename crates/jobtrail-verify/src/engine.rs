//! Chain verifier for append files.
//!
//! `ChainVerifier` replays a run's events in file order and stops at the
//! first inconsistency. For the event at position `i`:
//!
//! 1. **Shape** — the line must be a JSON object with exactly the
//!    `AuditEvent` fields, each of the right type.
//! 2. **Bytes** — the line must be byte-for-byte the canonical encoding of
//!    the object it parses to. Any edit that parses back to the same value
//!    (float exponent spelling, escape case, whitespace, key order) is
//!    caught here.
//! 3. **Run** — `run_id` must equal the first event's.
//! 4. **Seal** — no event may follow a `run.sealed` event.
//! 5. **Link** — `prev_event_hash` must equal the `event_hash` at `i - 1`
//!    (`""` at `i = 0`).
//! 6. **Digest** — the canonical encoding of every field except
//!    `event_hash`, chained from the expected previous hash, must reproduce
//!    the stored `event_hash`.
//!
//! The verifier reads only the raw lines. It never consults the durable
//! store, so a file can be checked on a machine that has nothing else.
//! A broken chain is reported in the returned `VerificationReport`; only
//! I/O failures are errors.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use jobtrail_audit::next_hash;
use jobtrail_contracts::{
    error::{TrailError, TrailResult},
    event::{AuditEvent, SEAL_STEP},
    verify::{BreakReason, VerificationReport},
};
use jobtrail_core::canonical;

/// Replays append files and event sequences.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainVerifier;

impl ChainVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verify the append file at `path`.
    ///
    /// Returns `TrailError::AuditFileNotFound` if `path` is not a file and
    /// `TrailError::Io` if it cannot be read.
    pub fn verify_file(&self, path: &Path) -> TrailResult<VerificationReport> {
        if !path.is_file() {
            return Err(TrailError::AuditFileNotFound {
                path: path.display().to_string(),
            });
        }
        let file = File::open(path).map_err(|e| TrailError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let report = self.verify_reader(BufReader::new(file), &path.display().to_string())?;
        debug!(
            path = %path.display(),
            events = report.events,
            valid = report.valid,
            "verified audit file"
        );
        Ok(report)
    }

    /// Verify newline-separated events from `reader`. `source` names the
    /// input in I/O errors.
    ///
    /// Lines are taken as raw bytes, so a line that is not UTF-8 is a
    /// malformed event rather than a read failure.
    pub fn verify_reader<R: BufRead>(
        &self,
        reader: R,
        source: &str,
    ) -> TrailResult<VerificationReport> {
        let mut replay = Replay::default();
        for chunk in reader.split(b'\n') {
            let bytes = chunk.map_err(|e| TrailError::Io {
                path: source.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(report) = replay.feed_bytes(&bytes) {
                return Ok(report);
            }
        }
        Ok(replay.finish())
    }

    /// Verify already-split lines.
    pub fn verify_lines<I, S>(&self, lines: I) -> VerificationReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut replay = Replay::default();
        for line in lines {
            if let Some(report) = replay.feed_bytes(line.as_ref().as_bytes()) {
                return report;
            }
        }
        replay.finish()
    }

    /// Verify an in-memory event sequence, e.g. rows read back from a store.
    pub fn verify_events(&self, events: &[AuditEvent]) -> TrailResult<VerificationReport> {
        let mut replay = Replay::default();
        for event in events {
            let value = canonical::to_value(event)?;
            if let Some(report) = replay.feed_value(value, None) {
                return Ok(report);
            }
        }
        Ok(replay.finish())
    }
}

// ── Replay state ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Replay {
    /// `event_hash` of the last verified event.
    expected_prev: String,
    /// `run_id` of the first event.
    run_id: Option<String>,
    /// Events verified so far; also the position of the next event.
    verified: usize,
    /// Whether the last verified event is a seal.
    sealed: bool,
}

impl Replay {
    /// Returns the final report if this line breaks the chain.
    fn feed_bytes(&mut self, line: &[u8]) -> Option<VerificationReport> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        let parsed = std::str::from_utf8(line)
            .map_err(|e| format!("line is not UTF-8: {e}"))
            .and_then(|text| {
                serde_json::from_str::<Value>(text).map_err(|e| format!("invalid JSON: {e}"))
            });
        match parsed {
            Ok(value) => self.feed_value(value, Some(line)),
            Err(message) => Some(self.broken(BreakReason::Malformed { message })),
        }
    }

    /// `raw` is the persisted line, when there is one to hold to the
    /// canonical form.
    fn feed_value(&mut self, value: Value, raw: Option<&[u8]>) -> Option<VerificationReport> {
        match self.check(value, raw) {
            Ok(()) => None,
            Err(reason) => Some(self.broken(reason)),
        }
    }

    /// Check one event and advance past it.
    fn check(&mut self, value: Value, raw: Option<&[u8]>) -> Result<(), BreakReason> {
        check_shape(&value)?;

        if let Some(raw) = raw {
            let expected = canonical::encode_value(&value);
            if expected != raw {
                return Err(BreakReason::NonCanonical {
                    offset: first_difference(raw, &expected),
                });
            }
        }

        let Value::Object(mut fields) = value else {
            return Err(malformed("event is not a JSON object"));
        };
        let stored = match fields.remove("event_hash") {
            Some(Value::String(hash)) => hash,
            _ => return Err(malformed("missing string field 'event_hash'")),
        };
        let run_id = string_field(&fields, "run_id")
            .ok_or_else(|| malformed("missing string field 'run_id'"))?
            .to_string();

        if let Some(expected) = &self.run_id {
            if *expected != run_id {
                return Err(BreakReason::RunIdMismatch {
                    expected: expected.clone(),
                    found: run_id,
                });
            }
        } else {
            self.run_id = Some(run_id);
        }

        if self.sealed {
            return Err(BreakReason::EventAfterSeal);
        }

        let found_prev = string_field(&fields, "prev_event_hash").unwrap_or_default();
        if found_prev != self.expected_prev {
            return Err(BreakReason::PrevHashMismatch {
                expected: self.expected_prev.clone(),
                found: found_prev.to_string(),
            });
        }

        let is_seal = string_field(&fields, "step") == Some(SEAL_STEP);
        let payload = canonical::encode_value(&Value::Object(fields));
        let recomputed = next_hash(&self.expected_prev, &payload);
        if recomputed != stored {
            return Err(BreakReason::HashMismatch { recomputed, stored });
        }

        self.expected_prev = stored;
        self.sealed = is_seal;
        self.verified += 1;
        Ok(())
    }

    fn broken(&self, reason: BreakReason) -> VerificationReport {
        warn!(
            run_id = self.run_id.as_deref().unwrap_or(""),
            break_index = self.verified,
            reason = ?reason,
            "audit chain broken"
        );
        VerificationReport {
            run_id: self.run_id.clone(),
            events: self.verified,
            valid: false,
            break_index: Some(self.verified),
            sealed: self.sealed,
            reason: Some(reason),
        }
    }

    fn finish(self) -> VerificationReport {
        VerificationReport {
            run_id: self.run_id,
            events: self.verified,
            valid: true,
            break_index: None,
            sealed: self.sealed,
            reason: None,
        }
    }
}

/// Every key of a persisted `AuditEvent`, in canonical order.
const EVENT_FIELDS: [&str; 11] = [
    "artifact_paths",
    "details",
    "event_hash",
    "input_digest",
    "output_digest",
    "prev_event_hash",
    "run_id",
    "status",
    "step",
    "ts_iso",
    "ts_ns",
];

/// The value must be an object carrying exactly the `AuditEvent` fields
/// with their types.
fn check_shape(value: &Value) -> Result<(), BreakReason> {
    let Value::Object(fields) = value else {
        return Err(malformed("event is not a JSON object"));
    };
    if let Some(extra) = fields.keys().find(|k| !EVENT_FIELDS.contains(&k.as_str())) {
        return Err(BreakReason::Malformed {
            message: format!("unexpected field '{extra}'"),
        });
    }
    if let Some(missing) = EVENT_FIELDS.iter().find(|k| !fields.contains_key(**k)) {
        return Err(BreakReason::Malformed {
            message: format!("missing field '{missing}'"),
        });
    }
    AuditEvent::deserialize(value).map_err(|e| BreakReason::Malformed {
        message: format!("invalid event: {e}"),
    })?;
    Ok(())
}

/// Byte offset of the first difference between two encodings.
fn first_difference(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .unwrap_or_else(|| a.len().min(b.len()))
}

fn string_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

fn malformed(message: &str) -> BreakReason {
    BreakReason::Malformed {
        message: message.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

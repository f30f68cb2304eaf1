//! Timestamp sources.

use std::sync::OnceLock;
use std::time::Instant;

use chrono::Utc;

use crate::traits::Clock;

/// Format used for `ts_iso`.
pub const ISO_SECONDS: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Reads the system wall clock and a process-local monotonic counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_iso(&self) -> String {
        Utc::now().format(ISO_SECONDS).to_string()
    }

    fn now_ns(&self) -> u64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = ORIGIN.get_or_init(Instant::now);
        u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// A clock that always reports the same instant. Useful for reproducible
/// hashes in tests and fixtures.
#[derive(Debug, Clone)]
pub struct FixedClock {
    pub iso: String,
    pub ns: u64,
}

impl FixedClock {
    pub fn new(iso: impl Into<String>, ns: u64) -> Self {
        Self { iso: iso.into(), ns }
    }
}

impl Clock for FixedClock {
    fn now_iso(&self) -> String {
        self.iso.clone()
    }

    fn now_ns(&self) -> u64 {
        self.ns
    }
}

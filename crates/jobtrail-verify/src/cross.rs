//! Append file vs durable store agreement.
//!
//! Both sinks are written for every event, but only the store commit can
//! fail after the file line is on disk. `cross_check` detects that case (and
//! any other disagreement) by comparing the two `event_hash` sequences. It
//! reports; it never repairs.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use jobtrail_contracts::{
    error::{TrailError, TrailResult},
    verify::{CrossCheckReport, SyncStatus},
};
use jobtrail_core::traits::AuditStore;

/// Compare the append file at `audit_path` with the store's rows for
/// `run_id`.
pub fn cross_check(
    audit_path: &Path,
    store: &dyn AuditStore,
    run_id: &str,
) -> TrailResult<CrossCheckReport> {
    let file_hashes = file_hashes(audit_path)?;
    let store_hashes: Vec<String> = store
        .events_for_run(run_id)?
        .into_iter()
        .map(|event| event.event_hash)
        .collect();

    let status = compare_hashes(&file_hashes, &store_hashes);
    if status.is_in_sync() {
        info!(run_id = %run_id, events = file_hashes.len(), "sinks in sync");
    } else {
        warn!(run_id = %run_id, status = ?status, "sinks disagree");
    }

    Ok(CrossCheckReport {
        run_id: run_id.to_string(),
        file_events: file_hashes.len(),
        store_events: store_hashes.len(),
        status,
    })
}

/// `event_hash` of every non-blank line, in file order. A line without a
/// readable hash yields `""`, which no stored event carries.
pub fn file_hashes(audit_path: &Path) -> TrailResult<Vec<String>> {
    if !audit_path.is_file() {
        return Err(TrailError::AuditFileNotFound {
            path: audit_path.display().to_string(),
        });
    }
    let bytes = fs::read(audit_path).map_err(|e| TrailError::Io {
        path: audit_path.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(|line| {
            serde_json::from_slice::<Value>(line)
                .ok()
                .and_then(|v| v.get("event_hash").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default()
        })
        .collect())
}

/// Classify two hash sequences.
pub fn compare_hashes(file: &[String], store: &[String]) -> SyncStatus {
    if let Some(index) = file.iter().zip(store).position(|(f, s)| f != s) {
        return SyncStatus::Diverged { index };
    }
    match file.len().cmp(&store.len()) {
        std::cmp::Ordering::Equal => SyncStatus::InSync,
        std::cmp::Ordering::Greater => SyncStatus::StoreLags {
            missing: file.len() - store.len(),
        },
        std::cmp::Ordering::Less => SyncStatus::FileLags {
            missing: store.len() - file.len(),
        },
    }
}

#[cfg(test)]
mod tests {
    use jobtrail_contracts::verify::SyncStatus;

    use super::compare_hashes;

    fn hashes(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compare_hashes() {
        let abc = hashes(&["a", "b", "c"]);
        assert_eq!(compare_hashes(&abc, &abc), SyncStatus::InSync);
        assert_eq!(compare_hashes(&[], &[]), SyncStatus::InSync);
        assert_eq!(
            compare_hashes(&abc, &hashes(&["a"])),
            SyncStatus::StoreLags { missing: 2 }
        );
        assert_eq!(
            compare_hashes(&hashes(&["a", "b"]), &abc),
            SyncStatus::FileLags { missing: 1 }
        );
        assert_eq!(
            compare_hashes(&hashes(&["a", "x", "c", "d"]), &abc),
            SyncStatus::Diverged { index: 1 }
        );
    }
}

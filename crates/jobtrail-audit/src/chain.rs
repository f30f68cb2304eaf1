//! Hash-chain primitives.
//!
//! Hash input layout (bytes, in order):
//!   1. prev_event_hash as UTF-8 bytes (empty for the first event of a run)
//!   2. canonical encoding of every event field except `event_hash`
//!
//! The digest excludes itself; everything else the event carries, including
//! the link to its predecessor, is committed to.

use sha2::{Digest, Sha256};

use jobtrail_contracts::{error::TrailResult, event::EventBody};
use jobtrail_core::canonical;

/// Compute the next link: lowercase hex SHA-256 of `prev_hash ++ payload`.
///
/// `prev_hash` of `""` is valid and denotes the start of a chain.
pub fn next_hash(prev_hash: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Compute `event_hash` for a body, chaining from its own `prev_event_hash`.
///
/// Fails only if the body's details cannot be canonically encoded.
pub fn hash_body(body: &EventBody) -> TrailResult<String> {
    let payload = canonical::encode(body)?;
    Ok(next_hash(&body.prev_event_hash, &payload))
}

//! Content digests for step inputs, outputs and artifacts.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use jobtrail_contracts::error::{TrailError, TrailResult};

const CHUNK: usize = 8192;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 of a file's contents, streamed in 8 KiB chunks.
pub fn sha256_file(path: &Path) -> TrailResult<String> {
    let io_err = |e: std::io::Error| TrailError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

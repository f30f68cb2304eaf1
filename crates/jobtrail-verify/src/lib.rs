//! # jobtrail-verify
//!
//! Independent checking of jobtrail audit trails.
//!
//! This crate provides:
//! - [`engine::ChainVerifier`], which replays a run's append file and reports
//!   the first position where the hash chain breaks
//! - [`cross::cross_check`], which compares the append file with the durable
//!   store's rows for the same run
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use jobtrail_verify::ChainVerifier;
//!
//! let report = ChainVerifier::new().verify_file(Path::new("artifacts/r1/audit.jsonl"))?;
//! if !report.valid {
//!     eprintln!("chain broken at event {:?}", report.break_index);
//! }
//! ```

pub mod cross;
pub mod engine;

pub use cross::{compare_hashes, cross_check, file_hashes};
pub use engine::ChainVerifier;

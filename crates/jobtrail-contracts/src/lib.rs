//! # jobtrail-contracts
//!
//! Shared types and error definitions for the jobtrail audit ledger.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate — only data definitions and error types.

pub mod error;
pub mod event;
pub mod run;
pub mod verify;

//! Thin HTTP clients for the gateway's external collaborators.
//!
//! Each client makes 2 attempts with a ~150 ms backoff, carries explicit
//! per-call timeouts, and returns the discriminated [`ClientResult`] so
//! controllers can map failures to domain errors (`timeout`, `unreachable`,
//! `bad_status`, `bad_json`). Degraded-collaborator logging is rate-limited
//! to once per failure kind per minute.

pub mod cas;
pub mod chain;
pub mod http;
pub mod indexer;

pub use http::{ClientError, ClientResult, HttpClient};

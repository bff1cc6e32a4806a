//! The Lumen gateway: the control-plane for a content-addressed storage
//! network. Wallet-authenticated clients submit CAR archives for pinning,
//! query their pinned content, and search a cross-referenced content index;
//! the gateway enforces the PQ transport envelope, per-wallet plan policy
//! from the chain, and multi-source pin bookkeeping.

pub mod cli;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod plan;
pub mod run;
pub mod search;
pub mod server;
pub mod state;
pub mod webhook;

pub const USER_AGENT: &str =
    concat!("lumen-gateway/", env!("CARGO_PKG_VERSION"));

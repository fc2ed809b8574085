//! grantmap: multi-account resource discovery with access evaluation, catalog registration,
//! and a liveness watchdog.
//!
//! Each account runs four phases on their own threads, linked by [`pipeline::CompletionQueue`]s:
//! scan, filter, access evaluation ([`access::BatchCaller`]), and registration. The
//! [`monitor::Watchdog`] samples per-stage progress counters and exits the process with
//! EX_TEMPFAIL when a stage stops moving.

pub mod access;
pub mod engine;
pub mod inventory;
pub mod monitor;
pub mod pipeline;
pub mod store;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

/// Result alias used by public grantmap API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use pipeline::{RunContext, RunStores, RunSummary, run_pipeline};

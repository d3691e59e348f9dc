//! Crate-wide error types.
//!
//! `IngestError` carries the one error kind from spec.md §7 that must fail
//! fast and distinctly (configuration error at session start). Every other
//! failure kind is recovered locally by the worker (logged and swallowed,
//! or reduced to a clean shutdown) and never escapes as an `Err` — callers
//! that do need to propagate something use `anyhow::Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no active session: the simulation context has not been started")]
    NoActiveSession,

    #[error("db_path is required")]
    MissingDbPath,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

//! Simulation data ingestion core: polls a growing SQLite journal,
//! merges per-table row streams into time-indexed frames, and publishes
//! them to subscribers.
//!
//! The `ingest-demo` binary is a thin CLI consumer of this library; the
//! library itself has no CLI or wire-protocol surface.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod service;
pub mod session;
pub mod util;

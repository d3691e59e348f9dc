//! Ambient logging setup.
//!
//! Standard `tracing-subscriber` fmt layer gated by `RUST_LOG` (default
//! `info`), the same mechanism the teacher used under its TUI log buffer,
//! minus the TUI-specific in-memory capture (this crate has no terminal UI
//! to protect from garbled output).

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Safe to call once per process;
/// a second call is a no-op (the error from `try_init` is discarded).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

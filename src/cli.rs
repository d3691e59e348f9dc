//! CLI surface for the `ingest-demo` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sim_ingest::config::VERSION;

#[derive(Parser)]
#[command(name = "ingest-demo")]
#[command(version = VERSION)]
#[command(about = "Demo consumer for the simulation data ingestion core", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a session against a journal store and print published frames.
    Run {
        /// Path to the journal SQLite store.
        #[arg(long)]
        db: PathBuf,

        /// Seconds between checkpoints.
        #[arg(long, default_value_t = 1.0)]
        query_interval: f64,

        /// Sliding window size (simulation seconds) to retain.
        #[arg(long, default_value_t = 60.0)]
        window: f64,
    },
}

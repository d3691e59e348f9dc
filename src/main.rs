//! `ingest-demo`: a small CLI consumer of the simulation data ingestion
//! core.
//!
//! Starts one session against a journal store, derives time hints from
//! wall-clock polling of the journal's own max `s_time` (a stand-in for
//! the out-of-scope external tick generator), and prints every published
//! frame as it arrives.

mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rusqlite::Connection;

use cli::{Cli, Commands};
use sim_ingest::config::IngestConfig;
use sim_ingest::service::DataService;
use sim_ingest::{logging, util};

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            db,
            query_interval,
            window,
        } => run(db, query_interval, window),
    }
}

fn run(db: std::path::PathBuf, query_interval: f64, window: f64) -> Result<()> {
    let service = DataService::new(window);
    service.repository.subscribe(std::sync::Arc::new(|frames, session_id| {
        for frame in frames {
            println!(
                "[{session_id}] t={:.1} tables={:?}",
                frame.time,
                frame.tables.keys().collect::<Vec<_>>()
            );
        }
    }));

    let session_id = service.context.start();
    tracing::info!(%session_id, db = %db.display(), "starting session");

    let config = IngestConfig {
        db_path: db.clone(),
        query_interval,
        window_size: window,
        ..Default::default()
    };
    service.start(config).context("failed to start session")?;

    println!("Polling {} — press Ctrl+C to stop", db.display());
    loop {
        if let Some(max_time) = max_s_time(&db) {
            service.enqueue_time(max_time);
        }
        std::thread::sleep(Duration::from_millis((query_interval * 1000.0) as u64));
    }
}

/// Best-effort scan across every table for the largest `s_time` seen so
/// far, used to synthesize a time hint without a real external tick
/// generator. Errors (store not yet created, table not yet present) are
/// swallowed; the caller simply sees no hint this round.
fn max_s_time(db_path: &std::path::Path) -> Option<f64> {
    let conn = Connection::open(db_path).ok()?;
    let mut stmt = conn
        .prepare("SELECT table_name FROM Object_Info")
        .ok()?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .ok()?
        .filter_map(Result::ok)
        .collect();

    tables
        .iter()
        .filter_map(|table| {
            let sql = format!(
                "SELECT MAX(s_time) FROM {}",
                util::quote_ident(table)
            );
            conn.query_row(&sql, [], |row| row.get::<_, Option<f64>>(0))
                .ok()
                .flatten()
        })
        .fold(None, |acc, t| Some(acc.map_or(t, |a: f64| a.max(t))))
}

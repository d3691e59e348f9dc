//! Configuration for the ingestion core.
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`~/.config/sim-ingest/config.toml`)
//! 3. Built-in defaults (lowest priority)

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;


/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration accepted by [`crate::service::DataService::start`].
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Path to the journal store. Required.
    pub db_path: PathBuf,

    /// Seconds between checkpoints.
    pub query_interval: f64,

    /// Expected total physical column count (including `s_time`) per
    /// logical object name, used by schema validation's strict mode.
    pub expected_column_counts: HashMap<String, usize>,

    /// Sliding window size (simulation seconds) the repository retains.
    pub window_size: f64,

    /// Retained for compatibility with earlier revisions. Unused by the
    /// independent-polling algorithm.
    #[allow(dead_code)]
    pub retry_count: u32,
    /// Retained for compatibility with earlier revisions. Unused by the
    /// independent-polling algorithm.
    #[allow(dead_code)]
    pub retry_interval_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::new(),
            query_interval: 1.0,
            expected_column_counts: HashMap::new(),
            window_size: 60.0,
            retry_count: 0,
            retry_interval_ms: 500,
        }
    }
}

/// Shadow struct mirroring the on-disk TOML layout. Every field is
/// optional: absence means "inherit the default / environment value."
#[derive(Debug, Default, Deserialize)]
struct FileIngestConfig {
    db_path: Option<PathBuf>,
    query_interval: Option<f64>,
    expected_column_counts: Option<HashMap<String, usize>>,
    window_size: Option<f64>,
    retry_count: Option<u32>,
    retry_interval_ms: Option<u64>,
}

impl IngestConfig {
    /// Default config file location: `~/.config/sim-ingest/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sim-ingest").join("config.toml"))
    }

    /// Load configuration: defaults, overlaid by the config file (if
    /// present), overlaid by `INGEST_*` environment variables.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(path) = Self::config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                match toml::from_str::<FileIngestConfig>(&contents) {
                    Ok(file) => config.apply_file(file),
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        config.apply_env();
        config
    }

    fn apply_file(&mut self, file: FileIngestConfig) {
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.query_interval {
            self.query_interval = v;
        }
        if let Some(v) = file.expected_column_counts {
            self.expected_column_counts = v;
        }
        if let Some(v) = file.window_size {
            self.window_size = v;
        }
        if let Some(v) = file.retry_count {
            self.retry_count = v;
        }
        if let Some(v) = file.retry_interval_ms {
            self.retry_interval_ms = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("INGEST_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INGEST_QUERY_INTERVAL") {
            if let Ok(parsed) = v.parse() {
                self.query_interval = parsed;
            }
        }
        if let Ok(v) = std::env::var("INGEST_WINDOW_SIZE") {
            if let Ok(parsed) = v.parse() {
                self.window_size = parsed;
            }
        }
    }
}

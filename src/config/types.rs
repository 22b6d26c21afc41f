//! Configuration types and CLI option enums.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::models::Resolution;

/// Logging level for the application.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Strategy for picking the next URL to crawl.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SamplerKind {
    /// Uniformly at random over the sampleable pool.
    Uni,
    /// Pair-weighted: prefer a second visit to hosts with exactly one visit.
    Pw,
}

/// Library configuration (no CLI dependencies).
///
/// Constructed programmatically or by the CLI layer. The data directory is
/// created on startup; the database and the body/screenshot stores live
/// underneath it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the database, response bodies, and screenshots.
    pub data_dir: PathBuf,

    /// Number of crawler workers, each owning one browser.
    pub workers: usize,

    /// URL sampling strategy.
    pub sampler: SamplerKind,

    /// Crawl-once semantics: sampled URLs leave the pool permanently.
    pub unique: bool,

    /// Domain files to feed through the URL provider.
    pub provider_domain_files: Vec<PathBuf>,

    /// Optional regex over browser-reported content types; matching bodies
    /// are the only ones written to the file store.
    pub filter_resp_bodies_ct: Option<String>,

    /// Attach to an existing debugger endpoint instead of launching
    /// browsers, e.g. `http://127.0.0.1:9222`.
    pub browser_endpoint: Option<String>,

    /// Browser window size.
    pub resolution: Resolution,

    /// Per-fetch deadline.
    pub fetch_timeout: Duration,

    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("crawled-data"),
            workers: 1,
            sampler: SamplerKind::Uni,
            unique: false,
            provider_domain_files: Vec::new(),
            filter_resp_bodies_ct: None,
            browser_endpoint: None,
            resolution: Resolution::default(),
            fetch_timeout: super::FETCH_TIMEOUT,
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
        }
    }
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(super::DB_FILE)
    }

    pub fn bodies_dir(&self) -> PathBuf {
        self.data_dir.join(super::BODIES_DIR)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.data_dir.join(super::SCREENSHOTS_DIR)
    }
}

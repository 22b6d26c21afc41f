//! Error type definitions.

use log::SetLoggerError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Error types for initialization failures. These are fatal and propagate to
/// the process exit code.
#[derive(Error, Debug)]
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the DNS resolver.
    #[error("DNS resolver initialization error: {0}")]
    DnsResolverError(String),

    /// The data directory could not be created or is not writable.
    #[error("Data directory error: {0}")]
    DataDirError(String),
}

/// Error types for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

/// Classified failures of a single crawl.
///
/// A crawl error never kills the crawler; it travels on the page result and
/// is persisted with the session. `BrowserConn` and `DeadlineExceeded`
/// additionally make the owning worker recreate its browser before it picks
/// up further work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlError {
    /// The debugger endpoint is unreachable or the browser process died.
    #[error("browser connection not responding: {0}")]
    BrowserConn(String),

    /// The fetch deadline elapsed at the transport layer.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The page never fired its DOM-content event within the deadline.
    #[error("timeout loading document object model")]
    DomTimeout,

    /// Navigation was rejected by the browser.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The network-level failure reported for the root action,
    /// e.g. `net::ERR_CONNECTION_REFUSED`.
    #[error("{0}")]
    Net(String),

    /// A debugger command or subscription failed mid-fetch.
    #[error("debugger protocol error: {0}")]
    Protocol(String),
}

impl CrawlError {
    /// True when the worker must tear down and recreate its browser before
    /// emitting a result.
    pub fn requires_browser_reset(&self) -> bool {
        matches!(
            self,
            CrawlError::BrowserConn(_) | CrawlError::DeadlineExceeded
        )
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            CrawlError::BrowserConn(_) => ErrorType::BrowserConn,
            CrawlError::DeadlineExceeded => ErrorType::FetchTimeout,
            CrawlError::DomTimeout => ErrorType::DomTimeout,
            CrawlError::Navigation(_) => ErrorType::Navigation,
            CrawlError::Net(_) => ErrorType::Net,
            CrawlError::Protocol(_) => ErrorType::Protocol,
        }
    }
}

/// Countable categories of per-crawl failures, for the end-of-run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorType {
    BrowserConn,
    FetchTimeout,
    DomTimeout,
    Navigation,
    Net,
    Protocol,
    Persistence,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::BrowserConn => "Browser connection error",
            ErrorType::FetchTimeout => "Fetch deadline exceeded",
            ErrorType::DomTimeout => "DOM load timeout",
            ErrorType::Navigation => "Navigation error",
            ErrorType::Net => "Network-level error",
            ErrorType::Protocol => "Debugger protocol error",
            ErrorType::Persistence => "Persistence error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_classification_matches_worker_contract() {
        assert!(CrawlError::BrowserConn("refused".into()).requires_browser_reset());
        assert!(CrawlError::DeadlineExceeded.requires_browser_reset());
        assert!(!CrawlError::DomTimeout.requires_browser_reset());
        assert!(!CrawlError::Net("net::ERR_CONNECTION_REFUSED".into()).requires_browser_reset());
    }

    #[test]
    fn crawl_error_messages_are_stable() {
        // Persisted session rows carry these strings; they must not drift.
        assert_eq!(
            CrawlError::DomTimeout.to_string(),
            "timeout loading document object model"
        );
        assert_eq!(CrawlError::DeadlineExceeded.to_string(), "deadline exceeded");
    }
}

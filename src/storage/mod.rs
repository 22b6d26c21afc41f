//! Database operations and storage management.
//!
//! This module provides:
//! - Database connection pool management (SQLite with WAL mode)
//! - Embedded schema migrations
//! - Dimension-table id stores with TTL caching
//! - Per-fact-table sub-stores and the one-transaction-per-page warehouse
//! - The content-addressed file store and the screenshot store
//! - The persistent URL store with pluggable samplers

mod actions;
mod console;
mod files;
mod id_store;
mod inserter;
mod migrations;
mod pool;
mod screenshots;
mod session;
#[cfg(test)]
pub(crate) mod test_helpers;
mod urls;
mod warehouse;

pub use files::{
    mime_any, mime_is_text, mime_matches, Compression, FileStore, FileStoreError, MimeValidator,
    ScreenshotStore, StoredFile,
};
pub use id_store::IdStore;
pub use inserter::{RowInserter, SqlValue};
pub use migrations::run_migrations;
pub use pool::init_db_pool_with_path;
pub use urls::{only_tld, Sampler, UrlFilter, UrlStore, UrlStoreError};
pub use warehouse::Warehouse;

//! Error types and per-run error accounting.
//!
//! Only initialization errors terminate the process. Everything that goes
//! wrong during a crawl is classified into a [`CrawlError`], recorded on the
//! page result, and counted in [`ErrorStats`].

mod stats;
mod types;

pub use stats::ErrorStats;
pub use types::{CrawlError, DatabaseError, ErrorType, InitializationError};

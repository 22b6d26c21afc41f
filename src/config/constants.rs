//! Configuration constants.
//!
//! Defaults and tunables used throughout the crawler: timeouts, cache TTLs,
//! channel and ring sizes, and filesystem layout under the data directory.

use std::time::Duration;

/// Per-fetch deadline. A page that has not terminated within this window is
/// reported with a timeout classification.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// How long to wait for a freshly launched browser's debugger endpoint to
/// become reachable before the launch is considered failed.
pub const ENDPOINT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for the debugger endpoint.
pub const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long the dispatcher sleeps before re-sampling an empty URL store.
pub const SAMPLE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Screenshot delay attached to dispatched crawl requests.
pub const DEFAULT_SCREENSHOT_DELAY: Duration = Duration::from_secs(1);

/// TTL for resolved host information (IP, nameservers).
pub const HOST_INFO_TTL: Duration = Duration::from_secs(120);

/// TTL for cached dimension-row ids.
pub const ID_CACHE_TTL: Duration = Duration::from_secs(300);

/// Number of saved-session summaries retained for observability.
pub const RECENT_SESSIONS: usize = 50;

/// Weight factor for the pair sampler: hosts with exactly one visited URL
/// are boosted by this factor to complete observation pairs.
pub const PAIR_SAMPLER_WEIGHT: u32 = 2000;

/// TCP probe timeout used by the domain-file URL provider.
pub const PROVIDER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// Filesystem layout under the data directory.
pub const DB_FILE: &str = "pageledger.db";
pub const BODIES_DIR: &str = "response_bodies";
pub const SCREENSHOTS_DIR: &str = "screenshots";

//! DNS resolver initialization.

use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;

use crate::error_handling::InitializationError;

/// DNS query timeout. Most queries complete well under a second; failing
/// fast keeps slow nameservers from stalling host-info enrichment.
const DNS_TIMEOUT: Duration = Duration::from_secs(3);

/// Initializes the DNS resolver used for host-info lookups (A and NS
/// records).
///
/// # Errors
///
/// Returns `InitializationError::DnsResolverError` if the resolver cannot be
/// constructed.
pub fn init_resolver() -> Result<Arc<TokioAsyncResolver>, InitializationError> {
    use hickory_resolver::config::{ResolverConfig, ResolverOpts};

    let mut opts = ResolverOpts::default();
    opts.timeout = DNS_TIMEOUT;
    opts.attempts = 2;
    // ndots = 0 prevents search-domain appending on bare hostnames
    opts.ndots = 0;

    Ok(Arc::new(TokioAsyncResolver::tokio(
        ResolverConfig::default(),
        opts,
    )))
}

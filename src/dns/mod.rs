//! Host information lookup with a short-lived cache.
//!
//! Workers enrich every distinct host seen during a page load with its first
//! IPv4 address and sorted nameserver set. Lookups go through a TTL cache so
//! pages dense with same-host subresources do not hammer the resolver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use tokio::sync::Mutex;

use crate::config::HOST_INFO_TTL;
use crate::domain;
use crate::models::Host;

struct CachedHost {
    host: Host,
    resolved_at: Instant,
}

/// Resolves hosts to [`Host`] facts, caching results for a couple of minutes.
///
/// Resolution is best-effort: a host that fails to resolve still yields a
/// `Host` carrying its domain with empty IP and nameservers, and negative
/// results are cached like positive ones.
pub struct HostResolver {
    resolver: Arc<TokioAsyncResolver>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedHost>>,
}

impl HostResolver {
    pub fn new(resolver: Arc<TokioAsyncResolver>) -> Self {
        Self::with_ttl(resolver, HOST_INFO_TTL)
    }

    pub fn with_ttl(resolver: Arc<TokioAsyncResolver>, ttl: Duration) -> Self {
        Self {
            resolver,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns host facts for `host`, from cache when fresh.
    pub async fn host_info(&self, host: &str) -> Host {
        let key = host.to_lowercase();

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.resolved_at.elapsed() < self.ttl {
                    return entry.host.clone();
                }
            }
        }

        let resolved = self.lookup(&key).await;

        let mut cache = self.cache.lock().await;
        cache.retain(|_, entry| entry.resolved_at.elapsed() < self.ttl);
        cache.insert(
            key,
            CachedHost {
                host: resolved.clone(),
                resolved_at: Instant::now(),
            },
        );

        resolved
    }

    async fn lookup(&self, host: &str) -> Host {
        let mut info = Host {
            domain: host.to_string(),
            ..Host::default()
        };

        // An IP literal is its own address; there is nothing to resolve.
        if domain::is_ip_literal(host) {
            info.ipv4 = host.to_string();
            return info;
        }

        if let Ok(lookup) = self.resolver.lookup(host, RecordType::NS).await {
            let mut nameservers: Vec<String> = lookup
                .iter()
                .filter_map(|rdata| {
                    if let RData::NS(ns) = rdata {
                        Some(ns.to_utf8())
                    } else {
                        None
                    }
                })
                .collect();
            nameservers.sort();
            info.nameservers = nameservers;
        }

        match self.resolver.lookup_ip(host).await {
            Ok(response) => {
                if let Some(ip) = response.iter().find(|ip| ip.is_ipv4()) {
                    info.ipv4 = ip.to_string();
                }
            }
            Err(e) => {
                log::debug!("host lookup failed for {host}: {e}");
            }
        }

        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::init_resolver;

    #[tokio::test]
    async fn ip_literals_skip_resolution() {
        let resolver = HostResolver::new(init_resolver().unwrap());
        let host = resolver.host_info("192.0.2.7").await;
        assert_eq!(host.domain, "192.0.2.7");
        assert_eq!(host.ipv4, "192.0.2.7");
        assert!(host.nameservers.is_empty());
    }

    #[tokio::test]
    async fn cache_returns_same_entry_within_ttl() {
        let resolver = HostResolver::new(init_resolver().unwrap());
        let first = resolver.host_info("203.0.113.1").await;
        let second = resolver.host_info("203.0.113.1").await;
        assert_eq!(first, second);
    }
}

//! Domain extraction and normalization utilities.
//!
//! Registrable domains (effective TLD + 1) are resolved against the bundled
//! Public Suffix List. They key both the screenshot directory layout and the
//! host dimension of the warehouse.

use std::net::IpAddr;

/// Extracts the registrable domain from a hostname, lowercased.
///
/// Returns `None` for IP literals and hosts the Public Suffix List cannot
/// place (e.g. bare labels like `localhost`).
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return None;
    }

    psl::domain_str(&host).map(str::to_string)
}

/// The public suffix of a hostname (`co.uk` for `www.example.co.uk`).
pub fn public_suffix(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    psl::suffix_str(&host).map(str::to_string)
}

/// True when the host is an IP literal rather than a name. Such hosts keep a
/// NULL host dimension in the warehouse.
pub fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

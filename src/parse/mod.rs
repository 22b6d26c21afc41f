//! Body classification and link extraction.
//!
//! Bodies arrive from the browser without trustworthy type information, so
//! both the file store and the link extractor classify them by content:
//! magic bytes for binary formats, tag sniffing for HTML, UTF-8 validity for
//! plain text. Link extraction only ever runs on HTML-classified bodies.

mod sniff;

pub use sniff::detect_content_type;

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

/// True for content types the link extractor understands.
pub fn is_html(content_type: &str) -> bool {
    content_type.starts_with("text/html")
}

/// Extracts followable links from a response body.
///
/// Only HTML-classified bodies are parsed. `a[href]` values are accepted
/// when they are absolute `http(s)` URLs or rooted paths (`/something`);
/// rooted paths are resolved against the base URL. Duplicates collapse.
pub fn extract_links(base: &Url, body: &[u8]) -> Vec<Url> {
    if !is_html(detect_content_type(body)) {
        return Vec::new();
    }

    let document = Html::parse_document(&String::from_utf8_lossy(body));
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        if !followable(href) {
            continue;
        }

        let resolved = if href.starts_with('/') {
            match base.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            }
        } else {
            match Url::parse(href) {
                Ok(u) => u,
                Err(_) => continue,
            }
        };

        if resolved.host_str().is_none() {
            continue;
        }

        if seen.insert(resolved.to_string()) {
            links.push(resolved);
        }
    }

    links
}

fn followable(href: &str) -> bool {
    if href.starts_with("http://") || href.starts_with("https://") {
        return true;
    }

    // Rooted paths only; fragments, query-only and relative links are noise.
    let mut chars = href.chars();
    chars.next() == Some('/') && chars.next().map(|c| c.is_ascii_alphabetic()) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/dir/page").unwrap()
    }

    #[test]
    fn non_html_bodies_yield_nothing() {
        assert!(extract_links(&base(), b"just some plain text").is_empty());
        assert!(extract_links(&base(), &[0x89, b'P', b'N', b'G']).is_empty());
    }

    #[test]
    fn rooted_links_resolve_against_base() {
        let body = br#"<html><body><a href="/about">about</a></body></html>"#;
        let links = extract_links(&base(), body);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://example.com/about");
    }

    #[test]
    fn absolute_links_pass_through_and_dedupe() {
        let body = br#"<html><body>
            <a href="https://other.example/a">one</a>
            <a href="https://other.example/a">two</a>
            <a href="http://third.example/b">three</a>
        </body></html>"#;
        let links = extract_links(&base(), body);
        let strs: Vec<&str> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            strs,
            vec!["https://other.example/a", "http://third.example/b"]
        );
    }

    #[test]
    fn fragments_and_relative_links_are_skipped() {
        let body = br##"<html><body>
            <a href="#top">top</a>
            <a href="relative/page">rel</a>
            <a href="mailto:x@example.com">mail</a>
            <a href="//protocol-relative.example/x">pr</a>
        </body></html>"##;
        assert!(extract_links(&base(), body).is_empty());
    }
}

//! Core value types shared across the crawler.
//!
//! A [`Page`] is the result of one browser visit to one initial URL: the
//! ordered list of [`CrawlAction`]s (request/response pairs) the browser
//! emitted for it, console output, screenshots, and the session timestamps.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error_handling::CrawlError;

/// Browser window size, rendered as `<width>x<height>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1366, 768)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A unit of work for a worker: which URL to load and when to photograph it.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: Url,
    /// Delays relative to the page-load event at which screenshots are taken.
    pub screenshots: Vec<Duration>,
}

impl CrawlRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            screenshots: Vec::new(),
        }
    }
}

/// Who caused a request to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorKind {
    /// The top-of-tree navigation itself.
    User,
    /// Issued because a parent response carried a 3xx status.
    Redirect,
    /// Discovered by the HTML parser (images, stylesheets, …).
    Parser,
    Script,
    Preload,
    Other,
}

impl InitiatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiatorKind::User => "user",
            InitiatorKind::Redirect => "redirect",
            InitiatorKind::Parser => "parser",
            InitiatorKind::Script => "script",
            InitiatorKind::Preload => "preload",
            InitiatorKind::Other => "other",
        }
    }

    /// Maps a debugger initiator type onto our taxonomy. Unknown kinds
    /// collapse into `Other`.
    pub fn from_protocol(kind: &str) -> Self {
        match kind {
            "parser" => InitiatorKind::Parser,
            "script" => InitiatorKind::Script,
            "preload" => InitiatorKind::Preload,
            _ => InitiatorKind::Other,
        }
    }
}

impl fmt::Display for InitiatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top frame of the JavaScript stack that triggered a request or log call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub function: Option<String>,
    pub url: String,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiator {
    pub kind: InitiatorKind,
    /// Present when the initiator carried a stack trace (script-initiated).
    pub stack: Option<CallFrame>,
}

/// Resolved network facts about a host at crawl time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub domain: String,
    /// First resolved IPv4 address, empty when resolution failed.
    pub ipv4: String,
    /// Sorted, so identical hosts dedup to the same dimension row.
    pub nameservers: Vec<String>,
}

/// TLS details attached to a response by the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityDetails {
    pub protocol: String,
    pub key_exchange: String,
    pub cipher: String,
    pub issuer: String,
    pub subject_name: String,
    pub san_list: Vec<String>,
    pub valid_from: i64,
    pub valid_to: i64,
}

impl SecurityDetails {
    /// SAN entries sorted and comma-joined, the form the warehouse dedups on.
    pub fn san_list_joined(&self) -> String {
        let mut sans = self.san_list.clone();
        sans.sort();
        sans.join(",")
    }
}

/// The request half of an action, as reported by the debugger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub post_data: Option<String>,
}

/// The response half of an action. `status` is the HTTP status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: i64,
    pub protocol: Option<String>,
    pub mime_type: String,
    pub headers: BTreeMap<String, String>,
    pub security_details: Option<SecurityDetails>,
}

/// Raw body bytes for an action, hashed at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub bytes: Vec<u8>,
    pub sha256: String,
}

/// One request/response pair observed during a page load.
///
/// `parent` is an index into the owning page's ordered action list; parents
/// always precede their children. A response and an error may both be set:
/// a transport failure can follow a received response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlAction {
    pub parent: Option<usize>,
    pub initiator: Initiator,
    pub host: Option<Host>,
    pub request: WireRequest,
    pub response: Option<WireResponse>,
    pub error: Option<String>,
    pub body: Option<ResponseBody>,
    /// Wall-clock request start in seconds since epoch, used for ordering.
    pub started_at: f64,
}

/// A console message retained from the page's JavaScript runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub msg: String,
    pub frame: Option<CallFrame>,
}

/// A screenshot taken at a requested delay after load.
#[derive(Debug, Clone)]
pub struct BrowserScreenshot {
    pub data: Vec<u8>,
    pub taken: DateTime<Utc>,
    pub resolution: Resolution,
    /// Image format, e.g. `png`. Lowercased when used in filenames.
    pub kind: String,
}

/// The full result of one crawl session.
#[derive(Debug, Clone)]
pub struct Page {
    pub initial_url: Url,
    pub resolution: String,
    pub actions: Vec<CrawlAction>,
    pub console: Vec<ConsoleMessage>,
    pub screenshots: Vec<BrowserScreenshot>,
    /// Links extracted from the root document body, fed back into the URL store.
    pub document_urls: Vec<Url>,
    pub initiated_at: DateTime<Utc>,
    pub navigated_at: DateTime<Utc>,
    pub loaded_at: DateTime<Utc>,
    pub terminated_at: DateTime<Utc>,
    pub error: Option<CrawlError>,
}

impl Page {
    /// A page skeleton carrying only what is known before navigation.
    pub fn new(initial_url: Url, resolution: Resolution) -> Self {
        let now = Utc::now();
        Self {
            initial_url,
            resolution: resolution.to_string(),
            actions: Vec::new(),
            console: Vec::new(),
            screenshots: Vec::new(),
            document_urls: Vec::new(),
            initiated_at: now,
            navigated_at: now,
            loaded_at: now,
            terminated_at: now,
            error: None,
        }
    }

    /// The registrable root domain of the initial URL, falling back to the
    /// raw host when the public-suffix list cannot resolve one.
    pub fn root_domain(&self) -> Option<String> {
        let host = self.initial_url.host_str()?;
        Some(crate::domain::registrable_domain(host).unwrap_or_else(|| host.to_string()))
    }
}

/// Outcome summary kept in the controller's recent-session ring.
#[derive(Debug, Clone)]
pub struct SavedSession {
    pub url: Url,
    pub crawl_error: Option<String>,
    pub store_error: Option<String>,
    pub crawl_duration: Duration,
    pub store_duration: Duration,
}

impl fmt::Display for SavedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.crawl_error.is_none() && self.store_error.is_none() {
            "✔"
        } else {
            "✘"
        };
        write!(
            f,
            "{} {:<8}{}{} (duration: {:.2?})",
            state,
            format!("[{}]", self.url.scheme()),
            self.url.host_str().unwrap_or(""),
            self.url.path(),
            self.crawl_duration,
        )?;
        if let Some(err) = self.crawl_error.as_deref().or(self.store_error.as_deref()) {
            write!(f, " (error: {err})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_renders_as_window_size() {
        assert_eq!(Resolution::new(1366, 768).to_string(), "1366x768");
        assert_eq!(Resolution::default().to_string(), "1366x768");
    }

    #[test]
    fn initiator_kind_from_protocol_collapses_unknowns() {
        assert_eq!(
            InitiatorKind::from_protocol("parser"),
            InitiatorKind::Parser
        );
        assert_eq!(
            InitiatorKind::from_protocol("script"),
            InitiatorKind::Script
        );
        assert_eq!(
            InitiatorKind::from_protocol("SignedExchange"),
            InitiatorKind::Other
        );
    }

    #[test]
    fn san_list_is_sorted_before_joining() {
        let details = SecurityDetails {
            protocol: "TLS 1.3".into(),
            key_exchange: "X25519".into(),
            cipher: "AES_128_GCM".into(),
            issuer: "Example CA".into(),
            subject_name: "example.com".into(),
            san_list: vec!["b.example.com".into(), "a.example.com".into()],
            valid_from: 0,
            valid_to: 1,
        };
        assert_eq!(details.san_list_joined(), "a.example.com,b.example.com");
    }

    #[test]
    fn page_root_domain_uses_registrable_domain() {
        let page = Page::new(
            Url::parse("https://deep.sub.example.co.uk/path").unwrap(),
            Resolution::default(),
        );
        assert_eq!(page.root_domain().as_deref(), Some("example.co.uk"));
    }

    #[test]
    fn saved_session_summary_marks_failures() {
        let ok = SavedSession {
            url: Url::parse("https://example.com/a").unwrap(),
            crawl_error: None,
            store_error: None,
            crawl_duration: Duration::from_secs(2),
            store_duration: Duration::from_millis(20),
        };
        assert!(ok.to_string().starts_with('✔'));

        let failed = SavedSession {
            crawl_error: Some("timeout loading document object model".into()),
            ..ok
        };
        let line = failed.to_string();
        assert!(line.starts_with('✘'));
        assert!(line.contains("timeout loading document object model"));
    }
}

//! Phishing-feed provider.
//!
//! Polls a PhishTank-style feed: a gzipped JSON list of verified phishing
//! entries, refreshed every few minutes. The ETag is checked with a HEAD
//! request so an unchanged feed costs one round trip, and entries are
//! emitted in id order with only ids above the last seen one passed on.

use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use super::UrlProvider;

const DEFAULT_ENDPOINT: &str = "http://data.phishtank.com/data/online-valid.json.gz";
const DEFAULT_TICK: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone)]
pub struct PhishFeedConfig {
    /// Feed endpoint; the default public feed unless an API key is set.
    pub endpoint: String,
    /// Time between feed refreshes.
    pub tick: Duration,
}

impl Default for PhishFeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            tick: DEFAULT_TICK,
        }
    }
}

impl PhishFeedConfig {
    /// The keyed endpoint for registered API users.
    pub fn with_api_key(key: &str) -> Self {
        Self {
            endpoint: format!("http://data.phishtank.com/data/{key}/online-valid.json.gz"),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FeedEntry {
    #[serde(rename = "phish_id")]
    raw_id: String,
    url: String,
}

impl FeedEntry {
    fn id(&self) -> i64 {
        self.raw_id.parse().unwrap_or(0)
    }
}

/// Emits every new entry of the feed, oldest first.
pub struct PhishFeedProvider {
    config: PhishFeedConfig,
    client: reqwest::Client,
    etag: Option<String>,
}

impl PhishFeedProvider {
    pub fn new(config: PhishFeedConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            etag: None,
        }
    }

    /// Fetches the feed when its ETag changed, sorted by entry id.
    /// An unchanged feed yields an empty batch.
    async fn entries(&mut self) -> Result<Vec<FeedEntry>, reqwest::Error> {
        let head = self.client.head(&self.config.endpoint).send().await?;
        let etag = head
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if etag.is_some() && etag == self.etag {
            return Ok(Vec::new());
        }
        self.etag = etag;

        let compressed = self
            .client
            .get(&self.config.endpoint)
            .send()
            .await?
            .bytes()
            .await?;

        let mut body = Vec::new();
        if GzDecoder::new(compressed.as_ref())
            .read_to_end(&mut body)
            .is_err()
        {
            // some mirrors serve the list uncompressed
            body = compressed.to_vec();
        }

        let mut entries: Vec<FeedEntry> = match serde_json::from_slice(&body) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("unable to decode phishing feed: {e}");
                Vec::new()
            }
        };
        entries.sort_by_key(FeedEntry::id);

        Ok(entries)
    }
}

impl UrlProvider for PhishFeedProvider {
    fn into_urls(mut self) -> mpsc::Receiver<Url> {
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut newest_id: i64 = 0;
            let mut ticker = tokio::time::interval(self.config.tick);

            loop {
                ticker.tick().await;

                let entries = match self.entries().await {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!("unable to fetch phishing feed: {e}");
                        continue;
                    }
                };

                for entry in entries {
                    if entry.id() <= newest_id {
                        continue;
                    }

                    let Ok(url) = Url::parse(&entry.url) else {
                        debug!("skipping malformed feed url: {}", entry.url);
                        continue;
                    };

                    if tx.send(url).await.is_err() {
                        return;
                    }
                    newest_id = entry.id();
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gzipped_feed(entries: &[(i64, &str)]) -> Vec<u8> {
        let json: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, url)| {
                serde_json::json!({
                    "phish_id": id.to_string(),
                    "url": url,
                    "online": "yes",
                    "target": "Other",
                })
            })
            .collect();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(serde_json::to_vec(&json).unwrap().as_slice())
            .unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn emits_new_entries_in_id_order() {
        let server = MockServer::start().await;
        // entries intentionally out of order
        let body = gzipped_feed(&[(7, "http://late.example/"), (3, "http://early.example/")]);

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v1\""))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let provider = PhishFeedProvider::new(PhishFeedConfig {
            endpoint: server.uri(),
            tick: Duration::from_millis(10),
        });

        let mut rx = provider.into_urls();
        assert_eq!(
            rx.recv().await.unwrap(),
            Url::parse("http://early.example/").unwrap()
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Url::parse("http://late.example/").unwrap()
        );
    }

    #[tokio::test]
    async fn unchanged_etag_emits_nothing_again() {
        let server = MockServer::start().await;
        let body = gzipped_feed(&[(1, "http://only.example/")]);

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"same\""))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(1) // the second tick must not refetch
            .mount(&server)
            .await;

        let provider = PhishFeedProvider::new(PhishFeedConfig {
            endpoint: server.uri(),
            tick: Duration::from_millis(10),
        });

        let mut rx = provider.into_urls();
        assert_eq!(
            rx.recv().await.unwrap(),
            Url::parse("http://only.example/").unwrap()
        );

        // give it a few ticks; nothing further may arrive
        let more = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(more.is_err(), "unexpected url after unchanged etag");
    }
}

//! URL providers: lazy, possibly-infinite URL sources.
//!
//! A provider owns a background task that pushes URLs into a channel; the
//! URL store consumes the channel. Provider failures stop the stream
//! without affecting the crawler.

mod domain_file;
mod phish_feed;

pub use domain_file::DomainFileProvider;
pub use phish_feed::{PhishFeedConfig, PhishFeedProvider};

use tokio::sync::mpsc;
use url::Url;

/// A source of URLs to crawl.
pub trait UrlProvider: Send + 'static {
    /// Consumes the provider, returning the channel its URLs arrive on.
    /// Dropping the receiver stops the provider.
    fn into_urls(self) -> mpsc::Receiver<Url>;
}

/// A provider over a fixed list, mostly for wiring and tests.
pub struct StaticProvider {
    urls: Vec<Url>,
}

impl StaticProvider {
    pub fn new(urls: Vec<Url>) -> Self {
        Self { urls }
    }
}

impl UrlProvider for StaticProvider {
    fn into_urls(self) -> mpsc::Receiver<Url> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for url in self.urls {
                if tx.send(url).await.is_err() {
                    return;
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_yields_all_urls() {
        let urls = vec![
            Url::parse("http://a.example/").unwrap(),
            Url::parse("http://b.example/").unwrap(),
        ];
        let mut rx = StaticProvider::new(urls.clone()).into_urls();

        let mut got = Vec::new();
        while let Some(url) = rx.recv().await {
            got.push(url);
        }
        assert_eq!(got, urls);
    }
}

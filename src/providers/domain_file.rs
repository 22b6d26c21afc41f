//! Domain-file provider: probe domains from a file for live web servers.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use url::Url;

use crate::config::PROVIDER_PROBE_TIMEOUT;

use super::UrlProvider;

/// Reads a file of domains and yields the `http`/`https` URL of every
/// domain that answers on the corresponding port.
pub struct DomainFileProvider {
    path: PathBuf,
    probe_timeout: Duration,
}

impl DomainFileProvider {
    /// # Errors
    ///
    /// Fails when the file does not exist or is not readable.
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        std::fs::metadata(&path)?;
        Ok(Self {
            path,
            probe_timeout: PROVIDER_PROBE_TIMEOUT,
        })
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

impl UrlProvider for DomainFileProvider {
    fn into_urls(self) -> mpsc::Receiver<Url> {
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let file = match tokio::fs::File::open(&self.path).await {
                Ok(file) => file,
                Err(e) => {
                    warn!("unable to open domain file {:?}: {e}", self.path);
                    return;
                }
            };

            let mut lines = tokio::io::BufReader::new(file).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let domain = line.trim().to_lowercase();
                if domain.is_empty() || domain.starts_with('#') {
                    continue;
                }

                for (port, scheme) in [(80u16, "http"), (443u16, "https")] {
                    if !port_open(&domain, port, self.probe_timeout).await {
                        continue;
                    }

                    let Ok(url) = Url::parse(&format!("{scheme}://{domain}")) else {
                        debug!("skipping malformed domain line: {domain}");
                        continue;
                    };

                    info!("found web server at {url}");
                    if tx.send(url).await.is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }
}

async fn port_open(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[tokio::test]
    async fn missing_file_is_rejected_up_front() {
        assert!(DomainFileProvider::new("/definitely/not/here.txt").is_err());
    }

    #[tokio::test]
    async fn unreachable_domains_yield_nothing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // TEST-NET-1 is guaranteed unroutable; the probe times out.
        writeln!(file, "192.0.2.1").unwrap();
        writeln!(file, "# a comment").unwrap();

        let provider = DomainFileProvider::new(file.path())
            .unwrap()
            .with_probe_timeout(Duration::from_millis(50));

        let mut rx = provider.into_urls();
        assert!(rx.recv().await.is_none());
    }
}

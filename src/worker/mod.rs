//! Crawl workers.
//!
//! A worker wraps one [`BrowserSession`] in a fetch loop. Connection-class
//! failures (unreachable debugger, transport deadline) make it tear the
//! browser down and build a fresh one, retrying indefinitely, before the
//! request is fetched again and a result is emitted. Every emitted page is
//! enriched with host info and the document's outgoing links.

mod controller;

pub use controller::{WorkerController, WorkerControllerConfig};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::browser::BrowserSession;
use crate::dns::HostResolver;
use crate::error_handling::CrawlError;
use crate::models::{CrawlRequest, Host, Page, Resolution};
use crate::parse::extract_links;

/// Settings shared by all workers of a controller.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Attach to this debugger endpoint instead of launching a browser.
    pub browser_endpoint: Option<String>,
    pub resolution: Resolution,
    pub fetch_timeout: Duration,
    pub resolver: Arc<HostResolver>,
}

pub struct Worker {
    session: BrowserSession,
    config: WorkerConfig,
}

impl Worker {
    /// Builds a worker with its own browser (or an attached one).
    pub async fn new(config: WorkerConfig) -> Result<Self, CrawlError> {
        let session = Self::create_session(&config).await?;
        Ok(Self { session, config })
    }

    async fn create_session(config: &WorkerConfig) -> Result<BrowserSession, CrawlError> {
        match &config.browser_endpoint {
            Some(endpoint) => BrowserSession::connect(endpoint, config.resolution).await,
            None => BrowserSession::launch(config.resolution).await,
        }
    }

    /// Consumes tasks until the channel closes or the token fires.
    pub async fn run(
        mut self,
        tasks: Arc<Mutex<mpsc::Receiver<CrawlRequest>>>,
        responses: mpsc::Sender<Page>,
        cancel: CancellationToken,
    ) {
        info!("worker running");
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = async { tasks.lock().await.recv().await } => {
                    match request {
                        Some(request) => request,
                        None => break,
                    }
                }
            };

            let page = self.fetch_with_reset(&request, &cancel).await;
            if responses.send(page).await.is_err() {
                break;
            }
        }

        self.session.close().await;
        info!("worker stopped");
    }

    /// Fetches a request, recreating the browser and retrying for
    /// connection-class failures. All other outcomes are returned as-is,
    /// enriched with host info and document links.
    async fn fetch_with_reset(
        &mut self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> Page {
        loop {
            let mut page = self
                .session
                .fetch(request, self.config.fetch_timeout)
                .await;

            let needs_reset = page
                .error
                .as_ref()
                .is_some_and(CrawlError::requires_browser_reset);
            if needs_reset && !cancel.is_cancelled() {
                warn!(
                    "browser reset after error: {}",
                    page.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                );
                self.reset_session(cancel).await;
                if cancel.is_cancelled() {
                    return page;
                }
                continue;
            }

            self.enrich_hosts(&mut page).await;

            if let Some(root) = page.actions.first() {
                if let Some(body) = &root.body {
                    page.document_urls = extract_links(&page.initial_url, &body.bytes);
                }
            }

            return page;
        }
    }

    /// Replaces the browser, retrying until a new one comes up.
    async fn reset_session(&mut self, cancel: &CancellationToken) {
        loop {
            match Self::create_session(&self.config).await {
                Ok(session) => {
                    let old = std::mem::replace(&mut self.session, session);
                    old.close().await;
                    return;
                }
                Err(e) => {
                    warn!("unable to recreate browser: {e}");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    }

    /// Attaches resolved host info to every action, one lookup per
    /// distinct host (the resolver caches across pages too).
    async fn enrich_hosts(&self, page: &mut Page) {
        let mut seen: HashMap<String, Host> = HashMap::new();

        for action in &mut page.actions {
            let host = Url::parse(&action.request.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string));
            let Some(host) = host else { continue };

            let info = match seen.get(&host) {
                Some(info) => info.clone(),
                None => {
                    let info = self.config.resolver.host_info(&host).await;
                    seen.insert(host.clone(), info.clone());
                    info
                }
            };
            action.host = Some(info);
        }
    }
}

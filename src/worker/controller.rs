//! Worker pool coordination.
//!
//! The controller samples URLs, dispatches them to workers over a shared
//! task channel, and persists every page that comes back. A one-slot
//! `ready` channel is the concurrency limiter: a new URL is only sampled
//! once a previous page has been stored, bounding in-flight work to the
//! number of workers plus one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_SCREENSHOT_DELAY, RECENT_SESSIONS, SAMPLE_RETRY_INTERVAL};
use crate::error_handling::{CrawlError, ErrorStats, ErrorType};
use crate::models::{CrawlRequest, Page, SavedSession};
use crate::storage::{UrlStore, UrlStoreError, Warehouse};

use super::{Worker, WorkerConfig};

pub struct WorkerControllerConfig {
    pub url_store: Arc<UrlStore>,
    pub warehouse: Arc<Warehouse>,
    pub worker: WorkerConfig,
    pub error_stats: Arc<ErrorStats>,
}

pub struct WorkerController {
    config: WorkerControllerConfig,
    cancel: CancellationToken,
    tasks_tx: mpsc::Sender<CrawlRequest>,
    tasks_rx: Arc<Mutex<mpsc::Receiver<CrawlRequest>>>,
    responses_tx: mpsc::Sender<Page>,
    ready_tx: mpsc::Sender<()>,
    recent: Arc<std::sync::Mutex<VecDeque<SavedSession>>>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerController {
    /// Builds the controller and starts its dispatch and persistence loops.
    pub fn new(config: WorkerControllerConfig) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let (tasks_tx, tasks_rx) = mpsc::channel::<CrawlRequest>(1);
        let (responses_tx, responses_rx) = mpsc::channel::<Page>(1);
        // one slot: at most one sampled-but-unstored URL beyond the workers
        let (ready_tx, ready_rx) = mpsc::channel::<()>(1);

        let controller = Arc::new(Self {
            config,
            cancel,
            tasks_tx,
            tasks_rx: Arc::new(Mutex::new(tasks_rx)),
            responses_tx,
            ready_tx,
            recent: Arc::new(std::sync::Mutex::new(VecDeque::with_capacity(
                RECENT_SESSIONS,
            ))),
            workers: Mutex::new(Vec::new()),
        });

        tokio::spawn(Arc::clone(&controller).dispatch_loop(ready_rx));
        tokio::spawn(Arc::clone(&controller).response_loop(responses_rx));

        controller
    }

    /// Spawns one worker and frees one dispatch slot for it.
    pub async fn add_worker(&self) -> Result<(), CrawlError> {
        let worker = Worker::new(self.config.worker.clone()).await?;

        let handle = tokio::spawn(worker.run(
            Arc::clone(&self.tasks_rx),
            self.responses_tx.clone(),
            self.cancel.child_token(),
        ));
        self.workers.lock().await.push(handle);

        let _ = self.ready_tx.send(()).await;
        Ok(())
    }

    /// Samples a URL per `ready` signal and publishes it as a crawl request.
    async fn dispatch_loop(self: Arc<Self>, mut ready_rx: mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                slot = ready_rx.recv() => {
                    if slot.is_none() {
                        return;
                    }
                }
            }

            let url = loop {
                match self.config.url_store.sample().await {
                    Ok(url) => break url,
                    Err(UrlStoreError::Empty) => {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = tokio::time::sleep(SAMPLE_RETRY_INTERVAL) => {}
                        }
                    }
                    Err(e) => {
                        warn!("unable to sample url: {e}");
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = tokio::time::sleep(SAMPLE_RETRY_INTERVAL) => {}
                        }
                    }
                }
            };

            let request = CrawlRequest {
                url,
                screenshots: vec![DEFAULT_SCREENSHOT_DELAY],
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                sent = self.tasks_tx.send(request) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Persists pages as they arrive; each stored page frees one slot.
    async fn response_loop(self: Arc<Self>, mut responses_rx: mpsc::Receiver<Page>) {
        loop {
            let page = tokio::select! {
                _ = self.cancel.cancelled() => return,
                page = responses_rx.recv() => {
                    match page {
                        Some(page) => page,
                        None => return,
                    }
                }
            };

            if let Some(error) = &page.error {
                self.config.error_stats.increment(error.error_type());
            }

            let store_start = Instant::now();
            let store_error = match self.config.warehouse.save_session(&page).await {
                Ok(_) => {
                    // Only a stored page marks its URL visited.
                    if let Err(e) = self
                        .config
                        .url_store
                        .visit(&page.initial_url, Utc::now())
                        .await
                    {
                        warn!("unable to mark visit for {}: {e}", page.initial_url);
                    }
                    if let Err(e) = self
                        .config
                        .url_store
                        .add(page.document_urls.clone())
                        .await
                    {
                        warn!("unable to add document urls: {e}");
                    }
                    None
                }
                Err(e) => {
                    self.config.error_stats.increment(ErrorType::Persistence);
                    warn!("unable to save session for {}: {e:#}", page.initial_url);
                    Some(e.to_string())
                }
            };

            let saved = SavedSession {
                url: page.initial_url.clone(),
                crawl_error: page.error.as_ref().map(|e| e.to_string()),
                store_error,
                crawl_duration: (Utc::now() - page.initiated_at)
                    .to_std()
                    .unwrap_or_default(),
                store_duration: store_start.elapsed(),
            };
            info!("{saved}");

            {
                let mut recent = self.recent.lock().expect("recent ring poisoned");
                if recent.len() == RECENT_SESSIONS {
                    recent.pop_front();
                }
                recent.push_back(saved);
            }

            let _ = self.ready_tx.send(()).await;
        }
    }

    /// The last stored sessions, newest last.
    pub fn recent_sessions(&self) -> Vec<SavedSession> {
        self.recent
            .lock()
            .expect("recent ring poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Cancels all loops and in-flight fetches.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Waits for all workers to tear down their browsers.
    pub async fn join(&self) {
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

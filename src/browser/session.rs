//! One browser, one session.
//!
//! A session either launches its own headless Chromium (with the debugger
//! endpoint awaited before use) or attaches to an endpoint somebody else
//! runs. `fetch` drives a single navigation in a fresh tab and reconstructs
//! the page from the debugger's event streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EnableParams as NetworkEnableParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EnableParams as PageEnableParams, EventDomContentEventFired,
    NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EnableParams as RuntimeEnableParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page as Tab;
use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::ENDPOINT_WAIT_TIMEOUT;
use crate::error_handling::CrawlError;
use crate::models::{BrowserScreenshot, CrawlRequest, Page, Resolution};

use super::correlate::actions_from_events;
use super::events::EventCollector;

/// Classifies a debugger failure: connection-level problems make the worker
/// recreate the browser, everything else stays a protocol error on the page.
fn classify(err: CdpError) -> CrawlError {
    let msg = err.to_string();
    let lowered = msg.to_lowercase();
    for needle in [
        "connection",
        "websocket",
        "channel",
        "browser closed",
        "io error",
    ] {
        if lowered.contains(needle) {
            return CrawlError::BrowserConn(msg);
        }
    }
    CrawlError::Protocol(msg)
}

/// Owns one Chromium instance and the task draining its message handler.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    resolution: Resolution,
    owns_process: bool,
}

impl BrowserSession {
    /// Launches a headless Chromium and waits for its debugger endpoint.
    pub async fn launch(resolution: Resolution) -> Result<Self, CrawlError> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(resolution.width, resolution.height)
            .arg("--disable-gpu")
            .build()
            .map_err(CrawlError::BrowserConn)?;

        let launched = timeout(ENDPOINT_WAIT_TIMEOUT, Browser::launch(config))
            .await
            .map_err(|_| {
                CrawlError::BrowserConn("timed out waiting for debugger endpoint".into())
            })?
            .map_err(classify)?;

        info!("browser launched ({resolution})");
        Ok(Self::wrap(launched, resolution, true))
    }

    /// Attaches to an already running browser's debugger endpoint
    /// (`http://host:port` or a websocket URL).
    pub async fn connect(endpoint: &str, resolution: Resolution) -> Result<Self, CrawlError> {
        let connected = timeout(ENDPOINT_WAIT_TIMEOUT, Browser::connect(endpoint))
            .await
            .map_err(|_| {
                CrawlError::BrowserConn("timed out waiting for debugger endpoint".into())
            })?
            .map_err(classify)?;

        info!("attached to browser at {endpoint}");
        Ok(Self::wrap(connected, resolution, false))
    }

    fn wrap(
        (browser, mut handler): (Browser, chromiumoxide::Handler),
        resolution: Resolution,
        owns_process: bool,
    ) -> Self {
        let handler_task = tokio::spawn(async move {
            while let Some(message) = handler.next().await {
                if message.is_err() {
                    break;
                }
            }
        });

        Self {
            browser,
            handler_task,
            resolution,
            owns_process,
        }
    }

    /// Loads one URL and reconstructs the page from the debugger events.
    ///
    /// Never fails: errors are classified onto the page's `error` field. A
    /// deadline hit before the DOM-content event counts as a DOM timeout; a
    /// later one is a transport-level deadline (and makes the worker reset
    /// the browser).
    pub async fn fetch(
        &self,
        request: &CrawlRequest,
        deadline: std::time::Duration,
    ) -> Page {
        info!("fetch start: {}", request.url);
        let mut page = Page::new(request.url.clone(), self.resolution);

        let dom_fired = Arc::new(AtomicBool::new(false));
        let tab_slot: Arc<tokio::sync::Mutex<Option<Tab>>> = Arc::default();

        let outcome = timeout(
            deadline,
            self.fetch_inner(request, &mut page, &dom_fired, &tab_slot),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                page.error = Some(err);
                page.terminated_at = Utc::now();
            }
            Err(_) => {
                page.error = Some(if dom_fired.load(Ordering::SeqCst) {
                    CrawlError::DeadlineExceeded
                } else {
                    CrawlError::DomTimeout
                });
                page.terminated_at = Utc::now();
            }
        }

        // The tab survives a timeout; close it so state cannot leak into
        // the next fetch.
        if let Some(tab) = tab_slot.lock().await.take() {
            if let Err(e) = tab.close().await {
                debug!("unable to close tab: {e}");
            }
        }

        match &page.error {
            Some(err) => info!("fetch error for {}: {err}", request.url),
            None => info!("fetch done: {}", request.url),
        }

        page
    }

    async fn fetch_inner(
        &self,
        request: &CrawlRequest,
        page: &mut Page,
        dom_fired: &AtomicBool,
        tab_slot: &tokio::sync::Mutex<Option<Tab>>,
    ) -> Result<(), CrawlError> {
        let tab = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(classify)?;
        *tab_slot.lock().await = Some(tab.clone());

        let mut dom_events = tab
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(classify)?;

        let collector = EventCollector::attach(&tab).await.map_err(classify)?;

        tab.execute(PageEnableParams::default())
            .await
            .map_err(classify)?;
        tab.execute(NetworkEnableParams::default())
            .await
            .map_err(classify)?;
        tab.execute(RuntimeEnableParams::default())
            .await
            .map_err(classify)?;

        page.navigated_at = Utc::now();
        let navigate = NavigateParams::builder()
            .url(request.url.as_str())
            .build()
            .map_err(CrawlError::Navigation)?;
        tab.execute(navigate).await.map_err(classify)?;

        // Bounded by the caller's deadline; a page that never fires
        // DOM-content surfaces as a DOM timeout there.
        dom_events.next().await;
        dom_fired.store(true, Ordering::SeqCst);
        page.loaded_at = Utc::now();

        page.screenshots = self.capture_screenshots(&tab, &request.screenshots).await;
        page.terminated_at = Utc::now();

        let (events, console) = collector.finish().await;
        page.actions = actions_from_events(events);
        page.console = console;

        if let Some(root) = page.actions.first() {
            if let Some(error) = &root.error {
                page.error = Some(CrawlError::Net(error.clone()));
            }
        }

        if let Some(tab) = tab_slot.lock().await.take() {
            if let Err(e) = tab.close().await {
                debug!("unable to close tab: {e}");
            }
        }

        Ok(())
    }

    /// Takes one screenshot per requested delay, all timed in parallel
    /// relative to the load event.
    async fn capture_screenshots(
        &self,
        tab: &Tab,
        delays: &[std::time::Duration],
    ) -> Vec<BrowserScreenshot> {
        let shots = delays.iter().map(|delay| {
            let tab = tab.clone();
            let resolution = self.resolution;
            let delay = *delay;
            async move {
                tokio::time::sleep(delay).await;

                let taken = Utc::now();
                let data = tab
                    .screenshot(
                        ScreenshotParams::builder()
                            .format(CaptureScreenshotFormat::Png)
                            .build(),
                    )
                    .await
                    .ok()?;

                Some(BrowserScreenshot {
                    data,
                    taken,
                    resolution,
                    kind: "png".to_string(),
                })
            }
        });

        futures::future::join_all(shots)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Tears the browser down. Attached browsers are left running.
    pub async fn close(mut self) {
        if self.owns_process {
            if let Err(e) = self.browser.close().await {
                warn!("unable to close browser: {e}");
            }
            if let Err(e) = self.browser.wait().await {
                debug!("browser did not exit cleanly: {e}");
            }
        }
        self.handler_task.abort();
    }
}

//! pageledger: a user-perspective web crawler.
//!
//! A pool of workers drives headless browsers over the remote-debugging
//! protocol, reconstructs every sub-request a page load emits, and records
//! the outcome in a normalized star-schema SQLite warehouse with
//! content-addressed body storage.
//!
//! # Example
//!
//! ```no_run
//! use pageledger::{run_crawler, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     workers: 2,
//!     provider_domain_files: vec!["domains.txt".into()],
//!     ..Default::default()
//! };
//!
//! let shutdown = CancellationToken::new();
//! run_crawler(config, shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod dns;
pub mod domain;
pub mod error_handling;
pub mod initialization;
pub mod models;
pub mod parse;
pub mod providers;
pub mod storage;
pub mod worker;

// Re-export the public API surface
pub use config::{Config, LogFormat, LogLevel, SamplerKind};
pub use error_handling::{CrawlError, ErrorStats};
pub use models::{CrawlAction, CrawlRequest, Page, Resolution};
pub use run::run_crawler;
pub use storage::Warehouse;

// Internal run module (wires the stores, workers, and controller together)
mod run {
    use std::sync::Arc;

    use anyhow::{bail, Context, Result};
    use log::{info, warn};
    use tokio_util::sync::CancellationToken;

    use crate::config::{Config, SamplerKind, PAIR_SAMPLER_WEIGHT};
    use crate::dns::HostResolver;
    use crate::error_handling::{ErrorStats, InitializationError};
    use crate::initialization::init_resolver;
    use crate::providers::DomainFileProvider;
    use crate::storage::{
        init_db_pool_with_path, mime_any, mime_matches, run_migrations, Compression, FileStore,
        Sampler, ScreenshotStore, UrlStore, Warehouse,
    };
    use crate::worker::{WorkerConfig, WorkerController, WorkerControllerConfig};

    fn ensure_dir(dir: &std::path::Path) -> Result<(), InitializationError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| InitializationError::DataDirError(format!("{}: {e}", dir.display())))
    }

    /// Runs the crawler until the shutdown token fires.
    ///
    /// # Errors
    ///
    /// Only initialization failures (unwritable data dir, database errors,
    /// bad filter regex, no URL source) are returned; everything that goes
    /// wrong during crawling is recorded per page and survives.
    pub async fn run_crawler(config: Config, shutdown: CancellationToken) -> Result<()> {
        for dir in [
            config.data_dir.clone(),
            config.bodies_dir(),
            config.screenshots_dir(),
        ] {
            ensure_dir(&dir)?;
        }

        let pool = init_db_pool_with_path(&config.db_path())
            .await
            .context("Failed to initialize database pool")?;
        run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        let sampler = match config.sampler {
            SamplerKind::Uni => Sampler::Uniform,
            SamplerKind::Pw => Sampler::PairWeighted {
                weight: PAIR_SAMPLER_WEIGHT,
            },
        };

        let url_store = Arc::new(
            UrlStore::open(Arc::clone(&pool), sampler, !config.unique, Vec::new())
                .await
                .context("Failed to load url store")?,
        );

        let mut providers = 0usize;
        for path in &config.provider_domain_files {
            let provider = DomainFileProvider::new(path)
                .with_context(|| format!("Failed to open domain file {}", path.display()))?;
            Arc::clone(&url_store).consume(provider);
            providers += 1;
        }
        if providers == 0 && url_store.size().await == 0 {
            bail!("need one or more providers, or a previously populated url store");
        }

        let mut bodies = FileStore::new(config.bodies_dir()).with_compression(Compression::Gzip);
        if let Some(pattern) = &config.filter_resp_bodies_ct {
            let re = regex::Regex::new(pattern)
                .with_context(|| format!("Invalid content-type filter: {pattern}"))?;
            bodies = bodies.with_mime_validators(vec![mime_matches(re)]);
        } else {
            bodies = bodies.with_mime_validators(vec![mime_any()]);
        }

        let warehouse = Arc::new(Warehouse::new(
            Arc::clone(&pool),
            bodies,
            ScreenshotStore::new(config.screenshots_dir()),
        ));

        let resolver = Arc::new(HostResolver::new(
            init_resolver().context("Failed to initialize DNS resolver")?,
        ));

        let error_stats = Arc::new(ErrorStats::new());

        let controller = WorkerController::new(WorkerControllerConfig {
            url_store: Arc::clone(&url_store),
            warehouse,
            worker: WorkerConfig {
                browser_endpoint: config.browser_endpoint.clone(),
                resolution: config.resolution,
                fetch_timeout: config.fetch_timeout,
                resolver,
            },
            error_stats: Arc::clone(&error_stats),
        });

        for i in 0..config.workers {
            if let Err(e) = controller.add_worker().await {
                warn!("unable to add worker {}: {e}", i + 1);
            }
        }
        info!(
            "crawler running with {} workers, {} known urls",
            config.workers,
            url_store.size().await
        );

        shutdown.cancelled().await;
        info!("shutting down");

        controller.close();
        controller.join().await;
        error_stats.log_summary();

        Ok(())
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use pageledger::{initialization::init_logger_with, run_crawler, Config, LogFormat, LogLevel, SamplerKind};

#[derive(Parser)]
#[command(
    name = "pageledger",
    version,
    about = "Crawl the web through a real browser and warehouse every request a page makes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the crawler until interrupted
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Amount of workers in the pool
    #[arg(short = 'n', long, default_value_t = 1)]
    workers: usize,

    /// The type of sampler used for prioritizing URLs
    #[arg(long, value_enum, default_value = "uni")]
    sampler: SamplerKind,

    /// Only crawl URLs once
    #[arg(short, long)]
    unique: bool,

    /// Directory to output crawled information
    #[arg(short = 'o', long, default_value = "crawled-data")]
    data_dir: PathBuf,

    /// Read a file and provide URLs based on the domains found in it
    #[arg(long = "provider-domain-file")]
    provider_domain_files: Vec<PathBuf>,

    /// Filter response bodies using a regex on their content type
    #[arg(long = "filter-resp-bodies-ct")]
    filter_resp_bodies_ct: Option<String>,

    /// Attach to an existing debugger endpoint instead of launching browsers
    #[arg(long)]
    browser_endpoint: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain")]
    log_format: LogFormat,
}

impl From<RunArgs> for Config {
    fn from(args: RunArgs) -> Self {
        Config {
            data_dir: args.data_dir,
            workers: args.workers,
            sampler: args.sampler,
            unique: args.unique,
            provider_domain_files: args.provider_domain_files,
            filter_resp_bodies_ct: args.filter_resp_bodies_ct,
            browser_endpoint: args.browser_endpoint,
            log_level: args.log_level,
            log_format: args.log_format,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    init_logger_with(args.log_level.clone().into(), args.log_format.clone())
        .context("Failed to initialize logger")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(e) => {
                log::warn!("unable to install SIGTERM handler: {e}");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        signal_token.cancel();
    });

    run_crawler(args.into(), shutdown).await
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod aggregator;
mod alert_gate;
mod config;
mod coordinator;
mod database;
mod errors;
mod extractor;
mod models;
mod notifier;
mod scraper;
mod snapshot;
mod traits;

use aggregator::GameAggregator;
use alert_gate::AlertGate;
use config::{Config, Mode, Secrets};
use coordinator::{Output, RunCoordinator};
use database::Database;
use errors::ConfigError;
use extractor::PriceExtractor;
use models::Currency;
use crate::scraper::browser::{self, ChromiumRenderer};
use crate::scraper::robots::RobotsChecker;
use crate::scraper::{PageFetcher, PortalScraper};
use snapshot::SnapshotWriter;

/// Watches travel portals for match tickets in a price range.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config/ticket-monitor.toml")]
    config: PathBuf,

    /// Override the mode set in the configuration file
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Keep running and check on this cron expression (with seconds),
    /// e.g. "0 */30 * * * *"
    #[arg(long, value_name = "CRON")]
    schedule: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let secrets = Secrets::from_env();
    let config = Config::load(&args.config, args.mode, &secrets)?;

    info!(
        "Starting ticket price monitor: {:?} mode, {} event(s), range {}-{}",
        config.mode,
        config.events.len(),
        config.range.low,
        config.range.high
    );

    let coordinator = Arc::new(build_coordinator(&config).await?);

    match args.schedule {
        None => {
            coordinator.run_once(Utc::now()).await?;
            Ok(())
        }
        Some(cron) => schedule(coordinator, &cron).await,
    }
}

async fn build_coordinator(config: &Config) -> Result<RunCoordinator> {
    let fetch = &config.fetch;
    let fetcher = PageFetcher::new(
        Arc::new(RobotsChecker::new(&fetch.user_agent)?),
        Arc::new(ChromiumRenderer::new(
            fetch.user_agent.clone(),
            fetch.settle(),
            fetch.page_timeout(),
        )),
        // Backstop only; the renderer enforces the page deadline and closes Chromium itself
        fetch.page_timeout() + browser::CLOSE_GRACE,
    );
    let scraper = PortalScraper::new(fetcher, PriceExtractor::new(Currency::Eur));

    let output = match config.mode {
        Mode::Alert => {
            let settings = config
                .notifier
                .as_ref()
                .ok_or(ConfigError::MissingNotifier)?;
            let database = Database::new(&config.database_url).await?;
            Output::Alert {
                gate: AlertGate::new(
                    Arc::new(database),
                    config.window,
                    config.max_alerts_per_day,
                ),
                notifier: notifier::from_settings(settings)?,
            }
        }
        Mode::Snapshot => Output::Snapshot(SnapshotWriter::new(config.snapshot_path.clone())),
    };

    Ok(RunCoordinator::new(
        scraper,
        GameAggregator::new(config.range),
        config.events.clone(),
        fetch.max_concurrent_renders,
        fetch.run_timeout(),
        output,
    ))
}

async fn schedule(coordinator: Arc<RunCoordinator>, cron: &str) -> Result<()> {
    // Run once immediately
    if let Err(e) = coordinator.run_once(Utc::now()).await {
        error!("Error during initial run: {:#}", e);
    }

    let mut sched = JobScheduler::new().await?;

    let job_coordinator = Arc::clone(&coordinator);
    sched
        .add(Job::new_async(cron, move |_uuid, _l| {
            let coordinator = Arc::clone(&job_coordinator);
            Box::pin(async move {
                if let Err(e) = coordinator.run_once(Utc::now()).await {
                    error!("Error during scheduled run: {:#}", e);
                }
            })
        })?)
        .await?;

    info!("Scheduler started with cron expression {}", cron);
    sched.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down scheduler");
    sched.shutdown().await?;

    Ok(())
}

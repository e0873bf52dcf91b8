use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use svitlomon::{
    api::ScheduleApiClient,
    config::AppConfig,
    db::Database,
    diff::{self, ScheduleDiffEngine},
    monitor::{self, AvailabilityMonitor},
    notify::TelegramNotifier,
    probe::TcpProbe,
    stats,
    traits::SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "svitlomon")]
#[command(about = "Power availability monitor with outage schedule notifications")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the availability and schedule loops (default)
    Run,
    /// Send yesterday's availability statistics and exit
    DayStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("svitlomon=debug");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let tz = config.timezone()?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, tz).await,
        Command::DayStats => day_stats(config, tz).await,
    }
}

/// Run both loops until a shutdown signal arrives.
async fn run(config: AppConfig, tz: chrono_tz::Tz) -> Result<()> {
    tracing::info!("Starting svitlomon");

    tracing::info!("Connecting to database...");
    let database = Database::new(&config.database.url).await?;
    tracing::info!("Database connected successfully");

    let notifier = TelegramNotifier::new(&config.telegram, &config.network)?;
    let api_client = ScheduleApiClient::new(&config.provider, &config.network)?;
    let probe = TcpProbe::new(&config.monitor);
    tracing::info!(
        "Monitoring {}:{} every {} seconds, schedule group {} every {} seconds",
        config.monitor.host,
        config.monitor.port,
        config.monitor.check_interval_secs,
        config.provider.group_id,
        config.provider.fetch_interval_secs
    );

    let availability =
        AvailabilityMonitor::new(probe, database.clone(), SystemClock, &config.monitor);
    let engine = ScheduleDiffEngine::new(database.clone(), SystemClock, tz);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {e}");
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    tokio::try_join!(
        monitor::run_availability_loop(
            availability,
            &database,
            &notifier,
            tz,
            config.notifications,
            &config.monitor,
            shutdown_rx.clone(),
        ),
        diff::run_schedule_loop(
            engine,
            api_client,
            &notifier,
            &config.provider,
            config.notifications,
            shutdown_rx,
        ),
    )?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// One-shot: send yesterday's statistics, suitable for a daily cron job.
async fn day_stats(config: AppConfig, tz: chrono_tz::Tz) -> Result<()> {
    let database = Database::new(&config.database.url).await?;
    let notifier = TelegramNotifier::new(&config.telegram, &config.network)?;
    stats::send_daily_report(&database, &notifier, &SystemClock, tz).await
}

//! # TaskCycle Worker
//!
//! Runs the recurring task reset job.
//!
//! ## Usage
//!
//! ```bash
//! # Scheduler loop (default): reset at every UTC midnight until Ctrl-C
//! cargo run -p taskcycle-worker -- run
//!
//! # Administrative re-run: one batch, then exit
//! cargo run -p taskcycle-worker -- reset-once --json
//!
//! # Apply migrations only
//! cargo run -p taskcycle-worker -- migrate
//! ```

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;
use taskcycle_shared::db::migrations::{migration_status, run_migrations};
use taskcycle_shared::db::pool::{close_pool, create_pool, DatabaseConfig};
use taskcycle_shared::store::PgTaskStore;
use taskcycle_worker::config::{Config, LogFormat};
use taskcycle_worker::reset::TaskResetService;
use taskcycle_worker::scheduler::{ResetScheduler, TickSchedule};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "taskcycle-worker", version, about = "Recurring task reset worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reset scheduler until interrupted
    Run {
        /// "daily" or an interval in seconds (overrides RESET_SCHEDULE)
        #[arg(long)]
        schedule: Option<TickSchedule>,

        /// Tasks read per scan page (overrides RESET_PAGE_SIZE)
        #[arg(long)]
        page_size: Option<usize>,

        /// Do not tick immediately on start
        #[arg(long)]
        no_run_on_start: bool,

        /// Do not apply migrations before starting
        #[arg(long)]
        skip_migrations: bool,
    },

    /// Run a single reset batch and exit
    ResetOnce {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        /// Tasks read per scan page (overrides RESET_PAGE_SIZE)
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Apply pending database migrations and exit
    Migrate,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "taskcycle_worker=info,taskcycle_shared=info".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let pool = create_pool(DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await
    .context("Failed to connect to database")?;

    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    init_tracing(config.log_format);

    tracing::info!(
        "TaskCycle Worker v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let command = cli.command.unwrap_or(Command::Run {
        schedule: None,
        page_size: None,
        no_run_on_start: false,
        skip_migrations: false,
    });

    match command {
        Command::Run {
            schedule,
            page_size,
            no_run_on_start,
            skip_migrations,
        } => {
            if let Some(schedule) = schedule {
                config.scheduler.schedule = schedule;
            }
            if let Some(page_size) = page_size {
                config.reset.page_size = page_size;
            }
            if no_run_on_start {
                config.scheduler.run_on_start = false;
            }
            if skip_migrations {
                config.run_migrations = false;
            }
            run_scheduler(config).await
        }
        Command::ResetOnce { json, page_size } => {
            if let Some(page_size) = page_size {
                config.reset.page_size = page_size;
            }
            reset_once(config, json).await
        }
        Command::Migrate => migrate(config).await,
    }
}

async fn run_scheduler(config: Config) -> anyhow::Result<()> {
    let pool = connect(&config).await?;

    if config.run_migrations {
        run_migrations(&pool).await.context("Failed to run migrations")?;
    }

    let store = Arc::new(PgTaskStore::new(pool.clone()));
    let service = TaskResetService::new(store, config.reset.clone());
    let scheduler = ResetScheduler::new(service, config.scheduler.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    let stats = scheduler.run(shutdown).await;

    tracing::info!(
        ticks = stats.ticks,
        failed_ticks = stats.failed_ticks,
        tasks_reset = stats.tasks_reset,
        "Worker stopped"
    );

    close_pool(pool).await;
    Ok(())
}

async fn reset_once(config: Config, json: bool) -> anyhow::Result<()> {
    let pool = connect(&config).await?;

    let store = Arc::new(PgTaskStore::new(pool.clone()));
    let service = TaskResetService::new(store, config.reset.clone());
    let scheduler = ResetScheduler::new(service, config.scheduler.clone());

    let result = scheduler.tick(Utc::now()).await;
    close_pool(pool).await;

    let summary = result.context("Task reset batch failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.message());
    }

    if summary.has_failures() {
        anyhow::bail!("{} task(s) failed to reset", summary.failed);
    }

    Ok(())
}

async fn migrate(config: Config) -> anyhow::Result<()> {
    let pool = connect(&config).await?;

    run_migrations(&pool).await.context("Failed to run migrations")?;
    let status = migration_status(&pool).await?;

    println!(
        "Applied {} of {} migrations (latest: {})",
        status.applied_migrations,
        status.known_migrations,
        status
            .latest_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    close_pool(pool).await;
    Ok(())
}

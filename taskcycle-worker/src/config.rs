/// Configuration management for the reset worker
///
/// Loads configuration from environment variables (and `.env` when present)
/// into a type-safe struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `RESET_PAGE_SIZE`: Tasks read per scan page (default: 500)
/// - `RESET_MAX_CONFLICT_RETRIES`: Retries per task after a version conflict (default: 3)
/// - `RESET_SCHEDULE`: `daily` or an interval in seconds (default: daily)
/// - `RESET_RUN_ON_START`: Tick once at startup (default: true)
/// - `RUN_MIGRATIONS`: Apply migrations before running (default: true)
/// - `LOG_FORMAT`: `pretty` or `json` (default: pretty)
/// - `RUST_LOG`: Log filter (default: taskcycle_worker=info,taskcycle_shared=info)
///
/// # Example
///
/// ```no_run
/// use taskcycle_worker::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Reset schedule: {}", config.scheduler.schedule);
/// # Ok(())
/// # }
/// ```

use crate::reset::{ResetConfig, DEFAULT_MAX_CONFLICT_RETRIES, DEFAULT_PAGE_SIZE};
use crate::scheduler::{SchedulerConfig, TickSchedule};
use anyhow::Context;
use std::env;
use std::str::FromStr;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,

    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be \"pretty\" or \"json\", got {:?}", other),
        }
    }
}

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseSettings,

    /// Reset batch configuration
    pub reset: ResetConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Apply migrations before starting the scheduler
    pub run_migrations: bool,

    /// Log output format
    pub log_format: LogFormat,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or any variable has an
    /// invalid value.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;
        let page_size = parse_or(&lookup, "RESET_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        let max_conflict_retries =
            parse_or(&lookup, "RESET_MAX_CONFLICT_RETRIES", DEFAULT_MAX_CONFLICT_RETRIES)?;
        let schedule = parse_or(&lookup, "RESET_SCHEDULE", TickSchedule::DailyUtc)?;
        let run_on_start = parse_bool_or(&lookup, "RESET_RUN_ON_START", true)?;
        let run_migrations = parse_bool_or(&lookup, "RUN_MIGRATIONS", true)?;
        let log_format = parse_or(&lookup, "LOG_FORMAT", LogFormat::Pretty)?;

        if page_size == 0 {
            anyhow::bail!("RESET_PAGE_SIZE must be at least 1");
        }

        Ok(Self {
            database: DatabaseSettings {
                url: database_url,
                max_connections,
            },
            reset: ResetConfig {
                page_size,
                max_conflict_retries,
            },
            scheduler: SchedulerConfig {
                schedule,
                run_on_start,
            },
            run_migrations,
            log_format,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> anyhow::Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("Invalid value for {key}: expected a boolean, got {v:?}"),
        },
    }
}

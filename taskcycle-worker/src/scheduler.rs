/// Scheduled reset trigger
///
/// Calls the reset service once per tick and reports the result on the
/// operator log. It holds no business logic: overlapping or repeated ticks
/// are safe because the service is idempotent within a cycle.
///
/// # Schedules
///
/// - `daily`: sleep until the next UTC midnight
/// - `<seconds>`: fixed interval
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use taskcycle_shared::store::MemoryTaskStore;
/// use taskcycle_worker::reset::{ResetConfig, TaskResetService};
/// use taskcycle_worker::scheduler::{ResetScheduler, SchedulerConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let service = TaskResetService::new(Arc::new(MemoryTaskStore::new()), ResetConfig::default());
/// let scheduler = ResetScheduler::new(service, SchedulerConfig::default());
///
/// let shutdown = CancellationToken::new();
/// let stats = scheduler.run(shutdown).await;
/// println!("{} ticks", stats.ticks);
/// # }
/// ```

use crate::reset::{ResetError, ResetSummary, TaskResetService};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use taskcycle_shared::cycle::{next_boundary, ResetCycle};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fallback delay when the next boundary cannot be computed
const FALLBACK_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// When the scheduler ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSchedule {
    /// At every UTC midnight
    DailyUtc,

    /// At a fixed interval
    Every(Duration),
}

/// Invalid schedule text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid schedule {0:?}: expected \"daily\" or a positive number of seconds")]
pub struct InvalidSchedule(pub String);

impl FromStr for TickSchedule {
    type Err = InvalidSchedule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("daily") {
            return Ok(TickSchedule::DailyUtc);
        }

        match trimmed.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(TickSchedule::Every(Duration::from_secs(secs))),
            _ => Err(InvalidSchedule(s.to_string())),
        }
    }
}

impl fmt::Display for TickSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickSchedule::DailyUtc => f.write_str("daily"),
            TickSchedule::Every(interval) => write!(f, "{}", interval.as_secs()),
        }
    }
}

impl TickSchedule {
    /// How long to wait from `now` until the next tick
    pub fn delay_until_next(&self, now: DateTime<Utc>) -> Duration {
        match self {
            TickSchedule::Every(interval) => *interval,
            TickSchedule::DailyUtc => next_boundary(ResetCycle::Daily, now)
                .and_then(|next| (next - now).to_std().ok())
                .unwrap_or(FALLBACK_DELAY),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tick schedule
    pub schedule: TickSchedule,

    /// Tick once immediately on start
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            schedule: TickSchedule::DailyUtc,
            run_on_start: true,
        }
    }
}

/// Counters accumulated over the scheduler's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks that ran
    pub ticks: u64,

    /// Ticks whose batch returned an error
    pub failed_ticks: u64,

    /// Tasks reset across all ticks
    pub tasks_reset: u64,
}

/// Periodic caller of [`TaskResetService::reset_eligible_tasks`]
pub struct ResetScheduler {
    /// Reset service
    service: TaskResetService,

    /// Configuration
    config: SchedulerConfig,
}

impl ResetScheduler {
    /// Creates a new scheduler
    pub fn new(service: TaskResetService, config: SchedulerConfig) -> Self {
        ResetScheduler { service, config }
    }

    /// Gets the configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs one batch at `now` and logs the outcome
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<ResetSummary, ResetError> {
        match self.service.reset_eligible_tasks(now).await {
            Ok(summary) => {
                tracing::info!(reset = summary.reset, "{}", summary.message());

                if summary.has_failures() {
                    tracing::warn!(failed = summary.failed, "Some tasks could not be reset");
                }
                if summary.conflicts > 0 {
                    tracing::warn!(
                        conflicts = summary.conflicts,
                        "Some tasks were skipped after version conflicts and will be retried next tick"
                    );
                }

                Ok(summary)
            }
            Err(e) => {
                tracing::error!(error = %e, "Task reset batch failed");
                Err(e)
            }
        }
    }

    /// Ticks until `shutdown` is cancelled
    ///
    /// A failed tick is logged and the loop keeps going.
    pub async fn run(&self, shutdown: CancellationToken) -> SchedulerStats {
        let mut stats = SchedulerStats::default();

        tracing::info!(
            schedule = %self.config.schedule,
            run_on_start = self.config.run_on_start,
            "Reset scheduler starting"
        );

        if self.config.run_on_start && !shutdown.is_cancelled() {
            self.record_tick(&mut stats).await;
        }

        loop {
            let delay = self.config.schedule.delay_until_next(Utc::now());
            tracing::debug!(delay_secs = delay.as_secs(), "Waiting for next tick");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(ticks = stats.ticks, "Reset scheduler shutting down");
                    break;
                }
                _ = sleep(delay) => {
                    self.record_tick(&mut stats).await;
                }
            }
        }

        stats
    }

    async fn record_tick(&self, stats: &mut SchedulerStats) {
        stats.ticks += 1;
        match self.tick(Utc::now()).await {
            Ok(summary) => stats.tasks_reset += summary.reset as u64,
            Err(_) => stats.failed_ticks += 1,
        }
    }
}

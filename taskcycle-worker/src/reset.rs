/// Task reset service
///
/// Scans every task with a reset cycle and zeroes the progress of those whose
/// cycle boundary has passed since their last reset.
///
/// # Algorithm
///
/// ```text
/// for each page of resettable tasks (keyset by id):
///     parse cycle           -> unknown: warn, skip
///     is_eligible(now)?     -> no: skip
///     apply_reset(version)  -> ok: count
///                           -> version moved: re-read, re-check, retry
/// ```
///
/// `now` is captured once by the caller and used for the whole batch, so a
/// task cannot cross a boundary halfway through a scan. Running the batch
/// twice in the same cycle resets nothing the second time because eligibility
/// is keyed off `last_reset_at`, which the first run advanced.
///
/// # Example
///
/// ```no_run
/// use chrono::Utc;
/// use std::sync::Arc;
/// use taskcycle_shared::store::MemoryTaskStore;
/// use taskcycle_worker::reset::{ResetConfig, TaskResetService};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = TaskResetService::new(Arc::new(MemoryTaskStore::new()), ResetConfig::default());
///
/// let summary = service.reset_eligible_tasks(Utc::now()).await?;
/// println!("{}", summary.message());
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use taskcycle_shared::cycle::is_eligible_for_reset;
use taskcycle_shared::models::task::Task;
use taskcycle_shared::store::{StoreError, TaskStore};
use thiserror::Error;

/// Default number of tasks read per page
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Default number of compare-and-set retries per task
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Reset service error
#[derive(Debug, Error)]
pub enum ResetError {
    /// Storage failed in a way that affects the whole batch
    #[error("Task store failure: {0}")]
    Store(#[from] StoreError),
}

/// Reset service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetConfig {
    /// Tasks read per page
    pub page_size: usize,

    /// Retries after a version conflict before giving up on a task
    pub max_conflict_retries: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        ResetConfig {
            page_size: DEFAULT_PAGE_SIZE,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    /// Tasks with a reset cycle that were examined
    pub scanned: usize,

    /// Tasks actually reset
    pub reset: usize,

    /// Tasks skipped because their cycle text is unknown
    pub skipped_unknown_cycle: usize,

    /// Tasks left alone after exhausting conflict retries
    pub conflicts: usize,

    /// Tasks whose reset failed with a row-level error
    pub failed: usize,
}

impl ResetSummary {
    /// Operator-facing summary line
    pub fn message(&self) -> String {
        if self.reset == 0 {
            "No tasks required resetting.".to_string()
        } else {
            format!("Successfully reset {} task(s).", self.reset)
        }
    }

    /// True when at least one task failed to reset
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Reset,
    NotEligible,
    UnknownCycle,
    Conflict,
}

/// Resets tasks whose cycle boundary has passed
#[derive(Clone)]
pub struct TaskResetService {
    /// Task storage
    store: Arc<dyn TaskStore>,

    /// Configuration
    config: ResetConfig,
}

impl TaskResetService {
    /// Creates a new reset service
    ///
    /// A page size of zero is treated as one.
    pub fn new(store: Arc<dyn TaskStore>, config: ResetConfig) -> Self {
        let config = ResetConfig {
            page_size: config.page_size.max(1),
            ..config
        };
        TaskResetService { store, config }
    }

    /// Gets the effective configuration
    pub fn config(&self) -> &ResetConfig {
        &self.config
    }

    /// Resets every eligible task as of `now`
    ///
    /// # Errors
    ///
    /// Returns an error if a page cannot be read or a write fails for a
    /// reason that is not confined to one row. Row-level failures are logged
    /// and counted in [`ResetSummary::failed`].
    pub async fn reset_eligible_tasks(&self, now: DateTime<Utc>) -> Result<ResetSummary, ResetError> {
        let mut summary = ResetSummary::default();
        let mut after = None;

        loop {
            let page = self
                .store
                .fetch_resettable(after, self.config.page_size)
                .await?;
            let page_len = page.len();

            tracing::debug!(page_len, after = ?after, "Scanning task page");

            for task in page {
                after = Some(task.id);
                summary.scanned += 1;

                let task_id = task.id;
                match self.reset_task(task, now).await {
                    Ok(TaskOutcome::Reset) => summary.reset += 1,
                    Ok(TaskOutcome::NotEligible) => {}
                    Ok(TaskOutcome::UnknownCycle) => summary.skipped_unknown_cycle += 1,
                    Ok(TaskOutcome::Conflict) => summary.conflicts += 1,
                    Err(e) if e.is_row_level() => {
                        tracing::error!(task_id = %task_id, error = %e, "Failed to reset task");
                        summary.failed += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if page_len < self.config.page_size {
                break;
            }
        }

        tracing::info!(
            scanned = summary.scanned,
            reset = summary.reset,
            skipped_unknown_cycle = summary.skipped_unknown_cycle,
            conflicts = summary.conflicts,
            failed = summary.failed,
            now = %now,
            "Reset batch finished"
        );

        Ok(summary)
    }

    /// Decides and applies the reset for a single task
    async fn reset_task(&self, mut task: Task, now: DateTime<Utc>) -> Result<TaskOutcome, StoreError> {
        let mut conflicts = 0;

        loop {
            let cycle = match task.parsed_reset_cycle() {
                Some(Ok(cycle)) => cycle,
                Some(Err(e)) => {
                    tracing::warn!(
                        task_id = %task.id,
                        reset_cycle = ?task.reset_cycle,
                        error = %e,
                        "Skipping task with unknown reset cycle"
                    );
                    return Ok(TaskOutcome::UnknownCycle);
                }
                // Cycle cleared since the page was read
                None => return Ok(TaskOutcome::NotEligible),
            };

            if !is_eligible_for_reset(cycle, task.last_reset_at, now) {
                return Ok(TaskOutcome::NotEligible);
            }

            if self.store.apply_reset(task.id, task.version, now).await? {
                tracing::debug!(
                    task_id = %task.id,
                    cycle = %cycle,
                    last_reset_at = ?task.last_reset_at,
                    "Task reset"
                );
                return Ok(TaskOutcome::Reset);
            }

            conflicts += 1;
            if conflicts > self.config.max_conflict_retries {
                tracing::warn!(
                    task_id = %task.id,
                    attempts = conflicts,
                    "Giving up on task after repeated version conflicts"
                );
                return Ok(TaskOutcome::Conflict);
            }

            task = match self.store.find_by_id(task.id).await? {
                Some(fresh) => fresh,
                None => return Ok(TaskOutcome::NotEligible),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskcycle_shared::cycle::ResetCycle;
    use taskcycle_shared::models::task::{CheckIn, CreateTask};
    use taskcycle_shared::models::task_history::TaskHistory;
    use taskcycle_shared::store::{MemoryTaskStore, StoreResult};
    use uuid::Uuid;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn task(cycle: Option<&str>, last_reset_at: Option<DateTime<Utc>>) -> Task {
        let created = utc(2023, 12, 1, 0, 0, 0);
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            text: "Drink water".to_string(),
            category: "Health".to_string(),
            completed: true,
            progress: 60,
            has_limit: false,
            unit: None,
            current_value: 6,
            target_value: None,
            increment_value: 1,
            reset_cycle: cycle.map(str::to_string),
            per_check_enabled: false,
            last_reset_at,
            version: 3,
            created_at: created,
            updated_at: created,
        }
    }

    fn service(store: Arc<dyn TaskStore>) -> TaskResetService {
        TaskResetService::new(store, ResetConfig::default())
    }

    #[test]
    fn test_reset_config_default() {
        let config = ResetConfig::default();
        assert_eq!(config.page_size, 500);
        assert_eq!(config.max_conflict_retries, 3);
    }

    #[test]
    fn test_zero_page_size_is_clamped() {
        let service = TaskResetService::new(
            Arc::new(MemoryTaskStore::new()),
            ResetConfig {
                page_size: 0,
                max_conflict_retries: 1,
            },
        );
        assert_eq!(service.config().page_size, 1);
    }

    #[test]
    fn test_summary_message() {
        let mut summary = ResetSummary::default();
        assert_eq!(summary.message(), "No tasks required resetting.");

        summary.reset = 3;
        assert_eq!(summary.message(), "Successfully reset 3 task(s).");
        assert!(!summary.has_failures());

        summary.failed = 1;
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn test_empty_store_resets_nothing() {
        let store = Arc::new(MemoryTaskStore::new());
        let summary = service(store).reset_eligible_tasks(Utc::now()).await.unwrap();
        assert_eq!(summary, ResetSummary::default());
    }

    #[tokio::test]
    async fn test_scenario_three_stale_daily_seven_without_cycle() {
        let store = Arc::new(MemoryTaskStore::new());
        let now = utc(2024, 1, 10, 0, 5, 0);
        let stale = Some(utc(2024, 1, 9, 18, 0, 0));

        let mut untouched = Vec::new();
        for _ in 0..3 {
            store.insert(task(Some("daily"), stale)).await;
        }
        for i in 0..7 {
            let last = if i % 2 == 0 { None } else { stale };
            let t = task(None, last);
            untouched.push(t.clone());
            store.insert(t).await;
        }

        let summary = service(store.clone()).reset_eligible_tasks(now).await.unwrap();
        assert_eq!(summary.reset, 3);
        assert_eq!(summary.scanned, 3);

        for original in untouched {
            let stored = store.find_by_id(original.id).await.unwrap().unwrap();
            assert_eq!(stored, original);
        }
    }

    #[tokio::test]
    async fn test_never_reset_tasks_get_baseline_for_every_cycle() {
        let store = Arc::new(MemoryTaskStore::new());
        let now = utc(2024, 5, 15, 13, 0, 0);

        for cycle in ResetCycle::ALL {
            store.insert(task(Some(cycle.as_str()), None)).await;
        }

        let summary = service(store.clone()).reset_eligible_tasks(now).await.unwrap();
        assert_eq!(summary.reset, 4);

        for stored in store.tasks().await {
            assert_eq!(stored.last_reset_at, Some(now));
            assert_eq!(stored.progress, 0);
            assert_eq!(stored.current_value, 0);
            assert!(!stored.completed);
        }
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = Arc::new(MemoryTaskStore::new());
        let now = utc(2024, 2, 1, 0, 0, 1);

        store.insert(task(Some("daily"), Some(utc(2024, 1, 31, 12, 0, 0)))).await;
        store.insert(task(Some("monthly"), Some(utc(2024, 1, 31, 12, 0, 0)))).await;
        store.insert(task(Some("weekly"), None)).await;

        let service = service(store.clone());
        let first = service.reset_eligible_tasks(now).await.unwrap();
        assert_eq!(first.reset, 3);

        let snapshot = store.tasks().await;

        let second = service.reset_eligible_tasks(now).await.unwrap();
        assert_eq!(second.reset, 0);
        assert_eq!(second.scanned, 3);

        // Later in the same day is still the same cycle for every kind
        let later = service.reset_eligible_tasks(utc(2024, 2, 1, 23, 0, 0)).await.unwrap();
        assert_eq!(later.reset, 0);

        assert_eq!(store.tasks().await, snapshot);
    }

    #[tokio::test]
    async fn test_daily_boundary_within_batch() {
        let store = Arc::new(MemoryTaskStore::new());
        let last = utc(2024, 1, 1, 23, 59, 0);
        let t = task(Some("daily"), Some(last));
        let id = t.id;
        store.insert(t).await;

        let service = service(store.clone());

        let same_day = service.reset_eligible_tasks(utc(2024, 1, 1, 23, 59, 30)).await.unwrap();
        assert_eq!(same_day.reset, 0);

        let next_day = service.reset_eligible_tasks(utc(2024, 1, 2, 0, 1, 0)).await.unwrap();
        assert_eq!(next_day.reset, 1);

        let stored = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.last_reset_at, Some(utc(2024, 1, 2, 0, 1, 0)));
    }

    #[tokio::test]
    async fn test_limited_task_is_fully_cleared() {
        let store = Arc::new(MemoryTaskStore::new());
        let now = utc(2024, 3, 4, 0, 0, 0);

        let mut t = task(Some("weekly"), Some(utc(2024, 2, 28, 9, 0, 0)));
        t.has_limit = true;
        t.unit = Some("km".to_string());
        t.target_value = Some(50);
        t.current_value = 50;
        t.progress = 100;
        t.completed = true;
        let id = t.id;
        store.insert(t).await;

        let summary = service(store.clone()).reset_eligible_tasks(now).await.unwrap();
        assert_eq!(summary.reset, 1);

        let stored = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.current_value, 0);
        assert_eq!(stored.progress, 0);
        assert!(!stored.completed);
        assert_eq!(stored.last_reset_at, Some(now));
        assert_eq!(stored.target_value, Some(50));
    }

    #[tokio::test]
    async fn test_unknown_cycle_is_skipped() {
        let store = Arc::new(MemoryTaskStore::new());
        let odd = task(Some("fortnightly"), None);
        let odd_id = odd.id;
        store.insert(odd.clone()).await;
        store.insert(task(Some("yearly"), Some(utc(2023, 6, 1, 0, 0, 0)))).await;

        let summary = service(store.clone())
            .reset_eligible_tasks(utc(2024, 1, 1, 0, 0, 0))
            .await
            .unwrap();

        assert_eq!(summary.reset, 1);
        assert_eq!(summary.skipped_unknown_cycle, 1);
        assert_eq!(store.find_by_id(odd_id).await.unwrap().unwrap(), odd);
    }

    #[tokio::test]
    async fn test_pages_cover_every_task() {
        let store = Arc::new(MemoryTaskStore::new());
        for _ in 0..23 {
            store.insert(task(Some("daily"), None)).await;
        }

        let service = TaskResetService::new(
            store.clone(),
            ResetConfig {
                page_size: 5,
                ..ResetConfig::default()
            },
        );

        let summary = service.reset_eligible_tasks(utc(2024, 7, 1, 0, 0, 0)).await.unwrap();
        assert_eq!(summary.scanned, 23);
        assert_eq!(summary.reset, 23);
    }

    #[tokio::test]
    async fn test_page_size_exact_multiple() {
        let store = Arc::new(MemoryTaskStore::new());
        for _ in 0..10 {
            store.insert(task(Some("monthly"), None)).await;
        }

        let service = TaskResetService::new(
            store.clone(),
            ResetConfig {
                page_size: 5,
                ..ResetConfig::default()
            },
        );

        let summary = service.reset_eligible_tasks(utc(2024, 7, 1, 0, 0, 0)).await.unwrap();
        assert_eq!(summary.scanned, 10);
        assert_eq!(summary.reset, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_runs_reset_each_task_once() {
        let store = Arc::new(MemoryTaskStore::new());
        for _ in 0..200 {
            store
                .create(CreateTask {
                    user_id: Uuid::new_v4(),
                    text: "Stretch".to_string(),
                    category: "Health".to_string(),
                    has_limit: false,
                    unit: None,
                    target_value: None,
                    increment_value: 1,
                    reset_cycle: Some(ResetCycle::Daily),
                    per_check_enabled: false,
                })
                .await
                .unwrap();
        }

        let first = TaskResetService::new(
            store.clone(),
            ResetConfig {
                page_size: 7,
                ..ResetConfig::default()
            },
        );
        let second = first.clone();
        let now = utc(2024, 8, 1, 0, 0, 0);

        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.reset_eligible_tasks(now).await }),
            tokio::spawn(async move { second.reset_eligible_tasks(now).await }),
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();

        assert_eq!(a.reset + b.reset, 200);
        assert_eq!(a.failed + b.failed, 0);

        let tasks = store.tasks().await;
        assert_eq!(tasks.len(), 200);
        assert!(tasks.iter().all(|t| t.version == 1));
        assert!(tasks.iter().all(|t| t.last_reset_at == Some(now)));
    }

    /// Delegates to a memory store, but fails writes for chosen tasks and can
    /// simulate concurrent check-ins landing before a reset.
    struct FlakyStore {
        inner: MemoryTaskStore,
        rejected: HashSet<Uuid>,
        unavailable: bool,
        interfering_check_ins: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Self {
            FlakyStore {
                inner: MemoryTaskStore::new(),
                rejected: HashSet::new(),
                unavailable: false,
                interfering_check_ins: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn create(&self, data: CreateTask) -> StoreResult<Task> {
            self.inner.create(data).await
        }

        async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
            self.inner.find_by_id(id).await
        }

        async fn fetch_resettable(&self, after: Option<Uuid>, limit: usize) -> StoreResult<Vec<Task>> {
            self.inner.fetch_resettable(after, limit).await
        }

        async fn apply_reset(
            &self,
            id: Uuid,
            expected_version: i64,
            now: DateTime<Utc>,
        ) -> StoreResult<bool> {
            if self.unavailable {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            if self.rejected.contains(&id) {
                return Err(StoreError::Rejected {
                    task_id: id,
                    reason: "check constraint violated".to_string(),
                });
            }
            let pending = self.interfering_check_ins.load(Ordering::SeqCst);
            if pending > 0 {
                self.interfering_check_ins.store(pending - 1, Ordering::SeqCst);
                self.inner.check_in(id, None, now).await?;
            }
            self.inner.apply_reset(id, expected_version, now).await
        }

        async fn check_in(
            &self,
            id: Uuid,
            note: Option<String>,
            at: DateTime<Utc>,
        ) -> StoreResult<Option<CheckIn>> {
            self.inner.check_in(id, note, at).await
        }

        async fn set_reset_cycle(
            &self,
            id: Uuid,
            cycle: Option<ResetCycle>,
        ) -> StoreResult<Option<Task>> {
            self.inner.set_reset_cycle(id, cycle).await
        }

        async fn history_for(&self, task_id: Uuid) -> StoreResult<Vec<TaskHistory>> {
            self.inner.history_for(task_id).await
        }
    }

    #[tokio::test]
    async fn test_row_failure_does_not_abort_batch() {
        let mut store = FlakyStore::new();
        let bad = task(Some("daily"), None);
        store.rejected.insert(bad.id);
        store.inner.insert(bad).await;
        for _ in 0..4 {
            store.inner.insert(task(Some("daily"), None)).await;
        }

        let summary = service(Arc::new(store))
            .reset_eligible_tasks(utc(2024, 1, 1, 0, 0, 0))
            .await
            .unwrap();

        assert_eq!(summary.reset, 4);
        assert_eq!(summary.failed, 1);
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_batch() {
        let mut store = FlakyStore::new();
        store.unavailable = true;
        store.inner.insert(task(Some("daily"), None)).await;

        let result = service(Arc::new(store))
            .reset_eligible_tasks(utc(2024, 1, 1, 0, 0, 0))
            .await;

        assert!(matches!(
            result,
            Err(ResetError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_conflict_is_retried_after_reread() {
        let store = FlakyStore::new();
        let t = task(Some("daily"), Some(utc(2024, 1, 1, 8, 0, 0)));
        let id = t.id;
        store.inner.insert(t).await;
        store.interfering_check_ins.store(1, Ordering::SeqCst);

        let store = Arc::new(store);
        let now = utc(2024, 1, 2, 0, 0, 0);
        let summary = service(store.clone()).reset_eligible_tasks(now).await.unwrap();

        assert_eq!(summary.reset, 1);
        assert_eq!(summary.conflicts, 0);

        let stored = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.last_reset_at, Some(now));
        assert_eq!(stored.current_value, 0);
        // Initial 3, +1 check-in, +1 reset
        assert_eq!(stored.version, 5);
    }

    #[tokio::test]
    async fn test_persistent_conflict_gives_up() {
        let store = FlakyStore::new();
        store.inner.insert(task(Some("daily"), None)).await;
        store.interfering_check_ins.store(10, Ordering::SeqCst);

        let service = TaskResetService::new(
            Arc::new(store),
            ResetConfig {
                page_size: 10,
                max_conflict_retries: 2,
            },
        );

        let summary = service.reset_eligible_tasks(utc(2024, 1, 2, 0, 0, 0)).await.unwrap();
        assert_eq!(summary.reset, 0);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.failed, 0);
    }
}

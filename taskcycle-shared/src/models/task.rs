/// Task model and database operations
///
/// A task accumulates progress against an optional numeric target and may
/// reset on a calendar cadence. Progress state is only ever changed by two
/// writers: check-ins (which add to `current_value`) and the reset job (which
/// zeroes it). Both bump `version`, which the reset job uses for
/// compare-and-set.
///
/// # Lifecycle
///
/// ```text
/// never reset --(first scan)--> cycle N --(boundary crossed)--> cycle N+1 ...
/// reset_cycle = NULL: never scanned
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL,
///     text VARCHAR(500) NOT NULL,
///     category VARCHAR(100) NOT NULL,
///     completed BOOLEAN NOT NULL DEFAULT FALSE,
///     progress INTEGER NOT NULL DEFAULT 0,
///     has_limit BOOLEAN NOT NULL DEFAULT FALSE,
///     unit VARCHAR(50),
///     current_value INTEGER NOT NULL DEFAULT 0,
///     target_value INTEGER,
///     increment_value INTEGER NOT NULL DEFAULT 1,
///     reset_cycle VARCHAR(20),
///     per_check_enabled BOOLEAN NOT NULL DEFAULT FALSE,
///     last_reset_at TIMESTAMPTZ,
///     version BIGINT NOT NULL DEFAULT 0,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use taskcycle_shared::cycle::ResetCycle;
/// use taskcycle_shared::db::pool::{create_pool, DatabaseConfig};
/// use taskcycle_shared::models::task::{CreateTask, Task};
/// use chrono::Utc;
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let task = Task::create(&pool, CreateTask {
///     user_id: Uuid::new_v4(),
///     text: "Read".to_string(),
///     category: "Learning".to_string(),
///     has_limit: true,
///     unit: Some("pages".to_string()),
///     target_value: Some(50),
///     increment_value: 10,
///     reset_cycle: Some(ResetCycle::Daily),
///     per_check_enabled: true,
/// }).await?;
///
/// Task::check_in(&pool, task.id, Some("morning".to_string()), Utc::now()).await?;
/// # Ok(())
/// # }
/// ```

use crate::cycle::{ResetCycle, UnknownResetCycle};
use crate::models::task_history::{CreateTaskHistory, TaskHistory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Task model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// Unique task ID
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// What the task is
    pub text: String,

    /// Free-form grouping label
    pub category: String,

    /// Completion flag, independent of numeric progress
    pub completed: bool,

    /// Percentage 0-100
    pub progress: i32,

    /// Whether `current_value` is capped by `target_value`
    pub has_limit: bool,

    /// Label for the accumulator (e.g., "pages")
    pub unit: Option<String>,

    /// Accumulated value since the last reset
    pub current_value: i32,

    /// Accumulator ceiling
    pub target_value: Option<i32>,

    /// Amount added per check-in
    pub increment_value: i32,

    /// Stored cycle text; see [`Task::parsed_reset_cycle`]
    pub reset_cycle: Option<String>,

    /// Whether check-ins are written to history
    pub per_check_enabled: bool,

    /// When the task was last reset (null until the first reset)
    pub last_reset_at: Option<DateTime<Utc>>,

    /// Row version, bumped on every progress write
    pub version: i64,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the task was last updated
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new task
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_limit"))]
pub struct CreateTask {
    /// Owning user
    pub user_id: Uuid,

    /// Task text
    #[validate(length(min = 1, max = 500))]
    pub text: String,

    /// Category label
    #[validate(length(min = 1, max = 100))]
    pub category: String,

    /// Cap progress at `target_value`
    #[serde(default)]
    pub has_limit: bool,

    /// Accumulator label (required when `has_limit`)
    #[validate(length(min = 1, max = 50))]
    pub unit: Option<String>,

    /// Accumulator ceiling (required when `has_limit`)
    #[validate(range(min = 1))]
    pub target_value: Option<i32>,

    /// Amount added per check-in (default 1)
    #[serde(default = "default_increment")]
    #[validate(range(min = 1))]
    pub increment_value: i32,

    /// Reset cadence; `None` never resets
    pub reset_cycle: Option<ResetCycle>,

    /// Log each check-in to history
    #[serde(default)]
    pub per_check_enabled: bool,
}

fn default_increment() -> i32 {
    1
}

fn validate_limit(task: &CreateTask) -> Result<(), ValidationError> {
    if !task.has_limit {
        return Ok(());
    }

    let has_unit = task.unit.as_deref().is_some_and(|u| !u.trim().is_empty());
    if task.target_value.is_none() || !has_unit {
        let mut error = ValidationError::new("limit_requires_target_and_unit");
        error.message = Some(Cow::Borrowed(
            "a limited task needs a positive target value and a unit",
        ));
        return Err(error);
    }

    Ok(())
}

impl CreateTask {
    /// Builds a fresh task row from this input
    pub fn into_task(self, id: Uuid, now: DateTime<Utc>) -> Task {
        Task {
            id,
            user_id: self.user_id,
            text: self.text,
            category: self.category,
            completed: false,
            progress: 0,
            has_limit: self.has_limit,
            unit: self.unit,
            current_value: 0,
            target_value: self.target_value,
            increment_value: self.increment_value,
            reset_cycle: self.reset_cycle.map(|c| c.as_str().to_string()),
            per_check_enabled: self.per_check_enabled,
            last_reset_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of a single check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    /// Task state after the check-in
    pub task: Task,

    /// Amount actually added (smaller than the increment when clamped)
    pub applied: i32,

    /// History row, when the task logs check-ins
    pub history: Option<TaskHistory>,
}

/// Computes the progress percentage for `current` out of `target`
pub fn progress_percent(current: i32, target: i32) -> i32 {
    if target <= 0 {
        return 0;
    }
    let percent = i64::from(current) * 100 / i64::from(target);
    percent.clamp(0, 100) as i32
}

impl Task {
    /// Parses the stored reset cycle
    ///
    /// `None` when the task does not reset, `Some(Err(_))` when the stored
    /// text is not a known cycle kind.
    pub fn parsed_reset_cycle(&self) -> Option<Result<ResetCycle, UnknownResetCycle>> {
        self.reset_cycle.as_deref().map(str::parse)
    }

    /// Ceiling for `current_value`, if the task is limited
    pub fn limit_target(&self) -> Option<i32> {
        if self.has_limit {
            self.target_value.filter(|t| *t > 0)
        } else {
            None
        }
    }

    /// Zeroes progress and stamps the reset time
    pub fn apply_reset(&mut self, now: DateTime<Utc>) {
        self.current_value = 0;
        self.progress = 0;
        self.completed = false;
        self.last_reset_at = Some(now);
        self.version += 1;
        self.updated_at = now;
    }

    /// Adds one increment, clamped at the target
    ///
    /// Returns the amount actually added.
    pub fn apply_check_in(&mut self, at: DateTime<Utc>) -> i32 {
        let before = self.current_value;
        let mut next = before.saturating_add(self.increment_value);

        if let Some(target) = self.limit_target() {
            // A value already past a lowered target is kept, never reduced
            next = next.min(target).max(before);
            self.progress = progress_percent(next, target);
            if next >= target {
                self.completed = true;
            }
        }

        self.current_value = next;
        self.version += 1;
        self.updated_at = at;

        next - before
    }

    /// Creates a new task
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a table
    /// constraint rejects the row. Validate the input first.
    pub async fn create(pool: &PgPool, data: CreateTask) -> Result<Self, sqlx::Error> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (user_id, text, category, has_limit, unit, target_value,
                               increment_value, reset_cycle, per_check_enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, user_id, text, category, completed, progress, has_limit, unit,
                      current_value, target_value, increment_value, reset_cycle,
                      per_check_enabled, last_reset_at, version, created_at, updated_at
            "#,
        )
        .bind(data.user_id)
        .bind(data.text)
        .bind(data.category)
        .bind(data.has_limit)
        .bind(data.unit)
        .bind(data.target_value)
        .bind(data.increment_value)
        .bind(data.reset_cycle.map(|c| c.as_str()))
        .bind(data.per_check_enabled)
        .fetch_one(pool)
        .await?;

        Ok(task)
    }

    /// Finds a task by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, user_id, text, category, completed, progress, has_limit, unit,
                   current_value, target_value, increment_value, reset_cycle,
                   per_check_enabled, last_reset_at, version, created_at, updated_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(task)
    }

    /// Lists one page of tasks that participate in the reset scan
    ///
    /// Keyset pagination: pass the last ID of the previous page as `after`.
    pub async fn list_resettable(
        pool: &PgPool,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, user_id, text, category, completed, progress, has_limit, unit,
                   current_value, target_value, increment_value, reset_cycle,
                   per_check_enabled, last_reset_at, version, created_at, updated_at
            FROM tasks
            WHERE reset_cycle IS NOT NULL
              AND ($1::uuid IS NULL OR id > $1)
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(tasks)
    }

    /// Resets a task if its row version still matches
    ///
    /// Returns `false` when another writer changed the row since it was read,
    /// or when `now` would move `last_reset_at` backwards.
    pub async fn reset_if_version(
        pool: &PgPool,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET current_value = 0,
                progress = 0,
                completed = FALSE,
                last_reset_at = $3,
                version = version + 1,
                updated_at = $3
            WHERE id = $1
              AND version = $2
              AND reset_cycle IS NOT NULL
              AND (last_reset_at IS NULL OR last_reset_at < $3)
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records one check-in
    ///
    /// Locks the row, applies the increment, and appends history in the same
    /// transaction. Returns `None` if the task does not exist.
    pub async fn check_in(
        pool: &PgPool,
        id: Uuid,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<CheckIn>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, user_id, text, category, completed, progress, has_limit, unit,
                   current_value, target_value, increment_value, reset_cycle,
                   per_check_enabled, last_reset_at, version, created_at, updated_at
            FROM tasks
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut task) = task else {
            return Ok(None);
        };

        let applied = task.apply_check_in(at);

        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET current_value = $2,
                progress = $3,
                completed = $4,
                version = $5,
                updated_at = $6
            WHERE id = $1
            RETURNING id, user_id, text, category, completed, progress, has_limit, unit,
                      current_value, target_value, increment_value, reset_cycle,
                      per_check_enabled, last_reset_at, version, created_at, updated_at
            "#,
        )
        .bind(task.id)
        .bind(task.current_value)
        .bind(task.progress)
        .bind(task.completed)
        .bind(task.version)
        .bind(task.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        let history = if task.per_check_enabled {
            let entry = TaskHistory::create(
                &mut *tx,
                CreateTaskHistory {
                    task_id: task.id,
                    value: applied,
                    note,
                    recorded_at: at,
                },
            )
            .await?;
            Some(entry)
        } else {
            None
        };

        tx.commit().await?;

        Ok(Some(CheckIn {
            task,
            applied,
            history,
        }))
    }

    /// Changes the reset cadence
    ///
    /// Setting `None` removes the task from the reset scan.
    pub async fn set_reset_cycle(
        pool: &PgPool,
        id: Uuid,
        cycle: Option<ResetCycle>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET reset_cycle = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, text, category, completed, progress, has_limit, unit,
                      current_value, target_value, increment_value, reset_cycle,
                      per_check_enabled, last_reset_at, version, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(cycle.map(|c| c.as_str()))
        .fetch_optional(pool)
        .await?;

        Ok(task)
    }
}

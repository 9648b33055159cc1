/// Task history model and database operations
///
/// Append-only log of check-ins for tasks with `per_check_enabled`. Rows are
/// never updated; the reset job does not write here.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE task_history (
///     id BIGSERIAL PRIMARY KEY,
///     task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
///     value INTEGER NOT NULL,
///     note TEXT,
///     recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// One recorded check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskHistory {
    /// Row ID
    pub id: i64,

    /// Task the check-in belongs to
    pub task_id: Uuid,

    /// Amount added by the check-in
    pub value: i32,

    /// Optional user note
    pub note: Option<String>,

    /// When the check-in happened
    pub recorded_at: DateTime<Utc>,
}

/// Input for appending a history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskHistory {
    pub task_id: Uuid,
    pub value: i32,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TaskHistory {
    /// Appends a history row
    ///
    /// Takes any executor so it can join the check-in transaction.
    pub async fn create<'e, E>(executor: E, data: CreateTaskHistory) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let entry = sqlx::query_as::<_, TaskHistory>(
            r#"
            INSERT INTO task_history (task_id, value, note, recorded_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, task_id, value, note, recorded_at
            "#,
        )
        .bind(data.task_id)
        .bind(data.value)
        .bind(data.note)
        .bind(data.recorded_at)
        .fetch_one(executor)
        .await?;

        Ok(entry)
    }

    /// Lists a task's history, oldest first
    pub async fn list_by_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let entries = sqlx::query_as::<_, TaskHistory>(
            r#"
            SELECT id, task_id, value, note, recorded_at
            FROM task_history
            WHERE task_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }
}

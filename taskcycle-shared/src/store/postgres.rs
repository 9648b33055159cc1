/// PostgreSQL task store
///
/// Thin adapter from [`TaskStore`] onto the `Task` and `TaskHistory` model
/// queries. Resets use `UPDATE ... WHERE version = $2`; check-ins lock the
/// row with `SELECT ... FOR UPDATE` inside a transaction.

use super::{StoreResult, TaskStore};
use crate::cycle::ResetCycle;
use crate::models::task::{CheckIn, CreateTask, Task};
use crate::models::task_history::TaskHistory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

/// Task store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    /// Creates a store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, data: CreateTask) -> StoreResult<Task> {
        data.validate()?;
        Ok(Task::create(&self.pool, data).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(Task::find_by_id(&self.pool, id).await?)
    }

    async fn fetch_resettable(&self, after: Option<Uuid>, limit: usize) -> StoreResult<Vec<Task>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(Task::list_resettable(&self.pool, after, limit).await?)
    }

    async fn apply_reset(
        &self,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(Task::reset_if_version(&self.pool, id, expected_version, now).await?)
    }

    async fn check_in(
        &self,
        id: Uuid,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CheckIn>> {
        Ok(Task::check_in(&self.pool, id, note, at).await?)
    }

    async fn set_reset_cycle(
        &self,
        id: Uuid,
        cycle: Option<ResetCycle>,
    ) -> StoreResult<Option<Task>> {
        Ok(Task::set_reset_cycle(&self.pool, id, cycle).await?)
    }

    async fn history_for(&self, task_id: Uuid) -> StoreResult<Vec<TaskHistory>> {
        Ok(TaskHistory::list_by_task(&self.pool, task_id).await?)
    }
}

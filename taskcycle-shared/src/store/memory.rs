/// In-memory task store
///
/// Keeps tasks in a `BTreeMap` keyed by ID so keyset pagination matches the
/// PostgreSQL ordering. One `RwLock` guards tasks and history together, which
/// makes each write (including check-in + history append) atomic.

use super::{StoreResult, TaskStore};
use crate::cycle::ResetCycle;
use crate::models::task::{CheckIn, CreateTask, Task};
use crate::models::task_history::TaskHistory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default)]
struct Inner {
    tasks: BTreeMap<Uuid, Task>,
    history: Vec<TaskHistory>,
    next_history_id: i64,
}

/// Task store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a task row as-is
    ///
    /// No validation is applied, so rows with unknown cycle text or arbitrary
    /// `last_reset_at` values can be loaded.
    pub async fn insert(&self, task: Task) {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.id, task);
    }

    /// Returns every task, ordered by ID
    pub async fn tasks(&self) -> Vec<Task> {
        let inner = self.inner.read().await;
        inner.tasks.values().cloned().collect()
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    /// True when no tasks are stored
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, data: CreateTask) -> StoreResult<Task> {
        data.validate()?;

        let task = data.into_task(Uuid::new_v4(), Utc::now());
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.id, task.clone());

        Ok(task)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn fetch_resettable(&self, after: Option<Uuid>, limit: usize) -> StoreResult<Vec<Task>> {
        let inner = self.inner.read().await;

        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };

        let page = inner
            .tasks
            .range((lower, Bound::Unbounded))
            .map(|(_, task)| task)
            .filter(|task| task.reset_cycle.is_some())
            .take(limit)
            .cloned()
            .collect();

        Ok(page)
    }

    async fn apply_reset(
        &self,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;

        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(false);
        };

        let moves_forward = task.last_reset_at.map_or(true, |last| last < now);
        if task.version != expected_version || task.reset_cycle.is_none() || !moves_forward {
            return Ok(false);
        }

        task.apply_reset(now);
        Ok(true)
    }

    async fn check_in(
        &self,
        id: Uuid,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CheckIn>> {
        let mut inner = self.inner.write().await;

        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(None);
        };

        let applied = task.apply_check_in(at);
        let task = task.clone();

        let history = if task.per_check_enabled {
            inner.next_history_id += 1;
            let entry = TaskHistory {
                id: inner.next_history_id,
                task_id: task.id,
                value: applied,
                note,
                recorded_at: at,
            };
            inner.history.push(entry.clone());
            Some(entry)
        } else {
            None
        };

        Ok(Some(CheckIn {
            task,
            applied,
            history,
        }))
    }

    async fn set_reset_cycle(
        &self,
        id: Uuid,
        cycle: Option<ResetCycle>,
    ) -> StoreResult<Option<Task>> {
        let mut inner = self.inner.write().await;

        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(None);
        };

        task.reset_cycle = cycle.map(|c| c.as_str().to_string());
        task.version += 1;
        task.updated_at = Utc::now();

        Ok(Some(task.clone()))
    }

    async fn history_for(&self, task_id: Uuid) -> StoreResult<Vec<TaskHistory>> {
        let inner = self.inner.read().await;

        let mut entries: Vec<TaskHistory> = inner
            .history
            .iter()
            .filter(|entry| entry.task_id == task_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.recorded_at, entry.id));

        Ok(entries)
    }
}

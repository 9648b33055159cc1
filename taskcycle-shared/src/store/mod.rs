//! Task storage interface
//!
//! The reset engine only talks to storage through [`TaskStore`], so the same
//! service runs against PostgreSQL in production and an in-memory map in
//! tests.
//!
//! # Implementations
//!
//! - [`PgTaskStore`]: PostgreSQL via sqlx
//! - [`MemoryTaskStore`]: `BTreeMap` behind a `tokio::sync::RwLock`
//!
//! # Concurrency
//!
//! Every progress write bumps the row `version`. `apply_reset` is a
//! compare-and-set on that version, so a reset never overwrites a check-in
//! that landed after the row was read.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use taskcycle_shared::cycle::ResetCycle;
//! use taskcycle_shared::models::task::CreateTask;
//! use taskcycle_shared::store::{MemoryTaskStore, TaskStore};
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryTaskStore::new();
//! let task = store.create(CreateTask {
//!     user_id: Uuid::new_v4(),
//!     text: "Meditate".to_string(),
//!     category: "Health".to_string(),
//!     has_limit: false,
//!     unit: None,
//!     target_value: None,
//!     increment_value: 1,
//!     reset_cycle: Some(ResetCycle::Daily),
//!     per_check_enabled: false,
//! }).await?;
//!
//! assert!(store.apply_reset(task.id, task.version, Utc::now()).await?);
//! // Stale version: somebody else already wrote
//! assert!(!store.apply_reset(task.id, task.version, Utc::now()).await?);
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

use crate::cycle::ResetCycle;
use crate::models::task::{CheckIn, CreateTask, Task};
use crate::models::task_history::TaskHistory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Task store error
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage backend cannot be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A single row was refused by the backend
    #[error("Task {task_id} rejected: {reason}")]
    Rejected { task_id: Uuid, reason: String },

    /// Input failed validation
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl StoreError {
    /// True when the failure is confined to one row
    ///
    /// Row-level failures (constraint violations, undecodable rows, rejected
    /// writes) let a batch continue with the next task. Anything else means
    /// the backend itself is unhealthy.
    pub fn is_row_level(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db
                .code()
                .map_or(false, |code| is_row_level_sqlstate(&code)),
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::Decode(_)
            ),
            StoreError::Unavailable(_) => false,
            StoreError::Rejected { .. } | StoreError::Validation(_) => true,
        }
    }
}

/// SQLSTATE classes caused by the row's own data
///
/// Class 22 is a data exception, class 23 an integrity constraint violation.
/// Every other class (connection loss, shutdown, read-only failover,
/// serialization failure, resource exhaustion) is a server fault.
fn is_row_level_sqlstate(code: &str) -> bool {
    matches!(code.get(..2), Some("22") | Some("23"))
}

/// Task store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operations used by the reset engine and check-ins
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Validates and inserts a new task
    async fn create(&self, data: CreateTask) -> StoreResult<Task>;

    /// Finds a task by ID
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>>;

    /// Returns up to `limit` tasks with a non-null reset cycle and an ID
    /// greater than `after`, ordered by ID
    async fn fetch_resettable(&self, after: Option<Uuid>, limit: usize) -> StoreResult<Vec<Task>>;

    /// Resets progress if the row is still at `expected_version`
    ///
    /// Returns `false` when the version moved, the task vanished, it no
    /// longer has a reset cycle, or `now` is not after its last reset.
    async fn apply_reset(
        &self,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Records a check-in; `None` if the task does not exist
    async fn check_in(
        &self,
        id: Uuid,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CheckIn>>;

    /// Changes or clears the reset cycle
    async fn set_reset_cycle(
        &self,
        id: Uuid,
        cycle: Option<ResetCycle>,
    ) -> StoreResult<Option<Task>>;

    /// Lists a task's check-in history, oldest first
    async fn history_for(&self, task_id: Uuid) -> StoreResult<Vec<TaskHistory>>;
}

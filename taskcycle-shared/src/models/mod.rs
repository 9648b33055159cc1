/// Database models for TaskCycle
///
/// # Models
///
/// - `task`: Recurring tasks with progress and reset-cycle metadata
/// - `task_history`: Append-only check-in log
///
/// # Example
///
/// ```no_run
/// use taskcycle_shared::db::pool::{create_pool, DatabaseConfig};
/// use taskcycle_shared::models::task::Task;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let page = Task::list_resettable(&pool, None, 100).await?;
/// println!("{} resettable tasks on the first page", page.len());
/// # Ok(())
/// # }
/// ```

pub mod task;
pub mod task_history;

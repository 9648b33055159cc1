//! # TaskCycle Worker Library
//!
//! Recurring task reset engine: the batch service that zeroes progress when a
//! task's cycle boundary passes, and the scheduler that triggers it.
//!
//! ## Modules
//!
//! - `reset`: Bulk reset service with compare-and-set writes
//! - `scheduler`: Periodic trigger and operator logging
//! - `config`: Environment configuration
//!
//! ## Example
//!
//! ```no_run
//! use chrono::Utc;
//! use std::sync::Arc;
//! use taskcycle_shared::store::MemoryTaskStore;
//! use taskcycle_worker::reset::{ResetConfig, TaskResetService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TaskResetService::new(Arc::new(MemoryTaskStore::new()), ResetConfig::default());
//! let summary = service.reset_eligible_tasks(Utc::now()).await?;
//! assert_eq!(summary.reset, 0);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod reset;
pub mod scheduler;

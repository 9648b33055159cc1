//! # TaskCycle Shared Library
//!
//! Types and storage used by the TaskCycle reset worker.
//!
//! ## Module Organization
//!
//! - `cycle`: Reset cycle kinds and calendar boundary arithmetic
//! - `models`: Task and task history models with their SQL
//! - `store`: `TaskStore` trait with PostgreSQL and in-memory implementations
//! - `db`: Connection pool and migrations

pub mod cycle;
pub mod db;
pub mod models;
pub mod store;

/// Current version of the TaskCycle shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Database migration runner
///
/// Migrations live in `migrations/` at the workspace root and are embedded at
/// compile time with `sqlx::migrate!`. Each one is a reversible pair:
/// `{version}_{name}.up.sql` and `{version}_{name}.down.sql`.
///
/// # Example
///
/// ```no_run
/// use taskcycle_shared::db::migrations::{migration_status, run_migrations};
/// use taskcycle_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
/// run_migrations(&pool).await?;
///
/// let status = migration_status(&pool).await?;
/// println!("{} migrations applied", status.applied_migrations);
/// # Ok(())
/// # }
/// ```

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPool;
use tracing::{info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// Applied migration summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Number of successfully applied migrations
    pub applied_migrations: usize,

    /// Number of migrations embedded in this binary
    pub known_migrations: usize,

    /// Highest applied version
    pub latest_version: Option<i64>,
}

impl MigrationStatus {
    /// True when every embedded migration has been applied
    pub fn is_up_to_date(&self) -> bool {
        self.applied_migrations >= self.known_migrations
    }
}

/// Number of up migrations embedded in the binary
pub fn known_migrations() -> usize {
    MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .count()
}

/// Applies all pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    info!("Running database migrations");

    match MIGRATOR.run(pool).await {
        Ok(()) => {
            info!("Database migrations complete");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Database migration failed");
            Err(e)
        }
    }
}

/// Reads the migration bookkeeping table
pub async fn migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
              AND table_name = '_sqlx_migrations'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(MigrationStatus {
            applied_migrations: 0,
            known_migrations: known_migrations(),
            latest_version: None,
        });
    }

    let (count, latest_version): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), MAX(version) FROM _sqlx_migrations WHERE success = true",
    )
    .fetch_one(pool)
    .await?;

    Ok(MigrationStatus {
        applied_migrations: count as usize,
        known_migrations: known_migrations(),
        latest_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded() {
        assert_eq!(known_migrations(), 2);
    }

    #[test]
    fn test_is_up_to_date() {
        let status = MigrationStatus {
            applied_migrations: 1,
            known_migrations: 2,
            latest_version: Some(20240101000000),
        };
        assert!(!status.is_up_to_date());

        let status = MigrationStatus {
            applied_migrations: 2,
            ..status
        };
        assert!(status.is_up_to_date());
    }
}

//! SQLite connection pool for [`SqlxKvStore`](super::SqlxKvStore).
//!
//! The pool runs in WAL mode with a busy timeout so that concurrent
//! compare-and-swap statements queue on the write lock instead of failing.

use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::config::DatabaseConfig;
use crate::errors::{CertplaneError, Result};

pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the pool described by `config`, migrating the schema when
/// `auto_migrate` is set.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    check_pool_bounds(config)?;

    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| CertplaneError::Database {
            source: e,
            context: format!("Invalid SQLite URL: {}", config.url),
        })?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(config.idle_timeout())
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, url = %config.url, "Failed to open certificate store");
            CertplaneError::Database {
                source: e,
                context: format!("Failed to connect to database: {}", config.url),
            }
        })?;

    tracing::info!(
        url = %config.url,
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Certificate store pool ready"
    );

    if config.auto_migrate {
        super::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

fn check_pool_bounds(config: &DatabaseConfig) -> Result<()> {
    if !config.is_sqlite() {
        return Err(CertplaneError::config(format!(
            "database URL must be a sqlite: URL, got {:?}",
            config.url
        )));
    }
    if config.max_connections == 0 {
        return Err(CertplaneError::config("max_connections must be greater than 0"));
    }
    if config.min_connections > config.max_connections {
        return Err(CertplaneError::config("min_connections cannot exceed max_connections"));
    }
    Ok(())
}

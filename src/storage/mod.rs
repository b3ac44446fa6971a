//! # Storage and Persistence
//!
//! Bucketed key-value storage shared by the authority database and the ACME
//! state machine. Two backends are provided: an in-memory `dashmap` store and
//! a SQLite store behind an `sqlx` pool.

pub mod kv;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod sqlite;

pub use crate::config::DatabaseConfig;

pub use kv::{buckets, decode, encode, KvStore};
pub use memory::MemoryKvStore;
pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool};
pub use sqlite::SqlxKvStore;

use crate::errors::{CertplaneError, Result};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| CertplaneError::Database {
        source: e,
        context: "Database connectivity check failed".to_string(),
    })?;

    Ok(())
}

//! # Database Migration Management
//!
//! Schema migrations are embedded in the binary from `./migrations` and run
//! on startup when `auto_migrate` is enabled.

use crate::errors::{CertplaneError, Result};
use crate::storage::DbPool;
use tracing::{error, info};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Run all pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!(count = MIGRATOR.iter().count(), "Applying embedded database migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        error!(error = %e, "Database migration failed");
        CertplaneError::internal_with_source("Database migration failed", Box::new(e))
    })?;

    Ok(())
}

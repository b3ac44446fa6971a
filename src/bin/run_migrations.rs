//! Manual migration runner for the SQLite key-value store
//!
//! Usage: cargo run --bin run_migrations
//!
//! Set CERTPLANE_DATABASE_URL to specify the target database.
//! Defaults to sqlite://./data/certplane.db

use certplane::{config::DatabaseConfig, config::StorageBackend, storage::create_pool};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let db_config = DatabaseConfig {
        backend: StorageBackend::Sqlite,
        url: std::env::var("CERTPLANE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/certplane.db".to_string()),
        auto_migrate: false,
        ..Default::default()
    };

    let pool = create_pool(&db_config).await?;
    info!(url = %db_config.url, "Connected to database");

    certplane::storage::run_migrations(&pool).await?;

    let tables = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )
    .fetch_all(&pool)
    .await?;
    info!(?tables, "Migrations complete");

    Ok(())
}

//! SQLite-backed [`KvStore`].
//!
//! All buckets share the `kv_entries` table. Conditional writes are single
//! statements judged by `rows_affected()`, so SQLite's own write lock is the
//! only synchronization needed.

use async_trait::async_trait;
use sqlx::FromRow;
use tracing::instrument;

use super::kv::KvStore;
use crate::errors::{CertplaneError, Result};
use crate::storage::DbPool;

#[derive(Debug, Clone, FromRow)]
struct KvEntryRow {
    key: String,
    value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SqlxKvStore {
    pool: DbPool,
}

impl SqlxKvStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl KvStore for SqlxKvStore {
    #[instrument(skip(self), fields(bucket = %bucket, key = %key), name = "db_kv_get")]
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM kv_entries WHERE bucket = $1 AND key = $2",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CertplaneError::Database {
            source: e,
            context: format!("Failed to read {}/{}", bucket, key),
        })?;

        Ok(value)
    }

    #[instrument(skip(self, value), fields(bucket = %bucket, key = %key), name = "db_kv_set")]
    async fn set(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (bucket, key, value, updated_at)
            VALUES ($1, $2, $3, datetime('now'))
            ON CONFLICT (bucket, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| CertplaneError::Database {
            source: e,
            context: format!("Failed to write {}/{}", bucket, key),
        })?;

        Ok(())
    }

    #[instrument(skip(self, old, new), fields(bucket = %bucket, key = %key, insert = old.is_none()), name = "db_kv_cmp_and_swap")]
    async fn cmp_and_swap(
        &self,
        bucket: &str,
        key: &str,
        old: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool> {
        let result = match old {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO kv_entries (bucket, key, value, updated_at)
                    VALUES ($1, $2, $3, datetime('now'))
                    ON CONFLICT (bucket, key) DO NOTHING
                    "#,
                )
                .bind(bucket)
                .bind(key)
                .bind(new)
                .execute(&self.pool)
                .await
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE kv_entries
                    SET value = $1, updated_at = datetime('now')
                    WHERE bucket = $2 AND key = $3 AND value = $4
                    "#,
                )
                .bind(new)
                .bind(bucket)
                .bind(key)
                .bind(expected)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| CertplaneError::Database {
            source: e,
            context: format!("Failed conditional write on {}/{}", bucket, key),
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(bucket = %bucket), name = "db_kv_list")]
    async fn list(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let rows = sqlx::query_as::<_, KvEntryRow>(
            "SELECT key, value FROM kv_entries WHERE bucket = $1 ORDER BY key ASC",
        )
        .bind(bucket)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CertplaneError::Database {
            source: e,
            context: format!("Failed to list bucket {}", bucket),
        })?;

        Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
    }

    #[instrument(skip(self), fields(bucket = %bucket, key = %key), name = "db_kv_delete")]
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE bucket = $1 AND key = $2")
            .bind(bucket)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| CertplaneError::Database {
                source: e,
                context: format!("Failed to delete {}/{}", bucket, key),
            })?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

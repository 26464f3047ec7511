//! PostgreSQL archive backend
//!
//! Each operation runs in its own transaction. Query failures are logged and
//! rolled back instead of failing the job: a failed lookup reports the key
//! as absent and a failed insert is dropped.

use super::{DownloadArchive, quote_identifier};
use crate::error::ArchiveError;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Archive stored in a PostgreSQL table
#[derive(Debug)]
pub struct PostgresArchive {
    pool: PgPool,
    select_sql: String,
    insert_sql: String,
}

impl PostgresArchive {
    /// Connect to `url` and make sure `table` exists
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| {
                Error::Archive(ArchiveError::ConnectionFailed(format!(
                    "Failed to connect to archive database: {}",
                    e
                )))
            })?;

        let table = quote_identifier(table);
        let create = format!("CREATE TABLE IF NOT EXISTS {table} (entry TEXT PRIMARY KEY)");
        sqlx::query(&create).execute(&pool).await.map_err(|e| {
            Error::Archive(ArchiveError::QueryFailed(format!(
                "Failed to create archive table: {}",
                e
            )))
        })?;

        Ok(Self {
            pool,
            select_sql: format!("SELECT true FROM {table} WHERE entry = $1 LIMIT 1"),
            insert_sql: format!(
                "INSERT INTO {table} (entry) VALUES ($1) ON CONFLICT (entry) DO NOTHING"
            ),
        })
    }

    async fn try_contains(&self, key: &str) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let found: Option<bool> = sqlx::query_scalar(&self.select_sql)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(found.is_some())
    }

    async fn try_insert(&self, keys: &[String]) -> std::result::Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query(&self.insert_sql)
                .bind(key.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }
}

#[async_trait]
impl DownloadArchive for PostgresArchive {
    async fn contains(&self, key: &str) -> Result<bool> {
        match self.try_contains(key).await {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::warn!(error = %e, key, "archive lookup failed");
                Ok(false)
            }
        }
    }

    async fn insert(&self, key: &str) -> Result<()> {
        self.insert_all(&[key.to_string()]).await
    }

    async fn insert_all(&self, keys: &[String]) -> Result<()> {
        if let Err(e) = self.try_insert(keys).await {
            tracing::warn!(error = %e, count = keys.len(), "archive insert failed");
        }
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

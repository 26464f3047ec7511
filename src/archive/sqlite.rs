//! SQLite archive backend

use super::{DownloadArchive, quote_identifier};
use crate::error::ArchiveError;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Buffered keys below this count are inserted one statement at a time
const ROW_BY_ROW_LIMIT: usize = 100;

/// One bind variable per key; stays well below SQLITE_MAX_VARIABLE_NUMBER
const MAX_KEYS_PER_BATCH: usize = 500;

/// First SQLite release supporting `WITHOUT ROWID` tables
const WITHOUT_ROWID_VERSION: (u32, u32, u32) = (3, 8, 2);

/// Archive stored in a local SQLite database file
#[derive(Debug)]
pub struct SqliteArchive {
    pool: SqlitePool,
    select_sql: String,
    insert_sql: String,
    table: String,
}

impl SqliteArchive {
    /// Open (or create) the database at `path` and make sure `table` exists
    ///
    /// Every statement in `pragma` is run as `PRAGMA <stmt>` on each new
    /// connection.
    pub async fn connect(path: &Path, table: &str, pragma: &[String]) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Archive(ArchiveError::ConnectionFailed(format!(
                    "Failed to create archive directory: {}",
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Archive(ArchiveError::ConnectionFailed(format!(
                    "Failed to parse archive path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(60));

        let pragma = Arc::new(pragma.to_vec());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .after_connect(move |conn, _meta| {
                let pragma = Arc::clone(&pragma);
                Box::pin(async move {
                    for stmt in pragma.iter() {
                        let sql = format!("PRAGMA {stmt}");
                        sqlx::query(&sql).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::Archive(ArchiveError::ConnectionFailed(format!(
                    "Failed to open archive {}: {}",
                    path.display(),
                    e
                )))
            })?;

        let archive = Self::from_pool(pool, table);
        archive.create_table().await?;
        tracing::debug!(path = %path.display(), table, "opened download archive");
        Ok(archive)
    }

    fn from_pool(pool: SqlitePool, table: &str) -> Self {
        let table = quote_identifier(table);
        Self {
            select_sql: format!("SELECT 1 FROM {table} WHERE entry = ? LIMIT 1"),
            insert_sql: format!("INSERT OR IGNORE INTO {table} (entry) VALUES (?)"),
            pool,
            table,
        }
    }

    async fn create_table(&self) -> Result<()> {
        let version: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Archive(ArchiveError::ConnectionFailed(format!(
                    "Failed to query SQLite version: {}",
                    e
                )))
            })?;

        let suffix = if supports_without_rowid(&version) {
            " WITHOUT ROWID"
        } else {
            ""
        };
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (entry TEXT PRIMARY KEY){}",
            self.table, suffix
        );
        sqlx::query(&sql).execute(&self.pool).await.map_err(|e| {
            Error::Archive(ArchiveError::QueryFailed(format!(
                "Failed to create archive table: {}",
                e
            )))
        })?;
        Ok(())
    }
}

/// Whether an SQLite version string is at least 3.8.2
fn supports_without_rowid(version: &str) -> bool {
    let mut parts = version
        .split('.')
        .map(|p| p.trim().parse::<u32>().unwrap_or(0));
    let found = (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    );
    found >= WITHOUT_ROWID_VERSION
}

#[async_trait]
impl DownloadArchive for SqliteArchive {
    async fn contains(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(&self.select_sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Archive(ArchiveError::QueryFailed(format!(
                    "Failed to look up archive entry: {}",
                    e
                )))
            })?;
        Ok(found.is_some())
    }

    async fn insert(&self, key: &str) -> Result<()> {
        sqlx::query(&self.insert_sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Archive(ArchiveError::QueryFailed(format!(
                    "Failed to insert archive entry: {}",
                    e
                )))
            })?;
        Ok(())
    }

    /// Insert all keys in one transaction
    async fn insert_all(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let query_failed = |what: &str, e: sqlx::Error| {
            Error::Archive(ArchiveError::QueryFailed(format!("Failed to {}: {}", what, e)))
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin archive transaction", e))?;

        if keys.len() < ROW_BY_ROW_LIMIT {
            for key in keys {
                sqlx::query(&self.insert_sql)
                    .bind(key.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| query_failed("insert archive entry", e))?;
            }
        } else {
            for chunk in keys.chunks(MAX_KEYS_PER_BATCH) {
                let mut query_builder =
                    sqlx::QueryBuilder::new(format!("INSERT OR IGNORE INTO {} (entry) ", self.table));
                query_builder.push_values(chunk, |mut b, key| {
                    b.push_bind(key.as_str());
                });
                query_builder
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| query_failed("insert archive entries batch", e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit archive entries", e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::supports_without_rowid;

    #[test]
    fn version_gate() {
        assert!(supports_without_rowid("3.8.2"));
        assert!(supports_without_rowid("3.45.1"));
        assert!(!supports_without_rowid("3.8.1"));
        assert!(!supports_without_rowid("3.7.17"));
        assert!(!supports_without_rowid("garbage"));
    }
}

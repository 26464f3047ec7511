//! Download archive
//!
//! Records which items were already downloaded so later runs can skip them.
//! Every item is reduced to a key string by a format string (`archive-prefix`
//! + `archive-format`); the key is computed once and cached in the item under
//! `_archive_key`.
//!
//! ## Backends
//!
//! - [`SqliteArchive`]: default; a local database file
//! - [`PostgresArchive`]: selected by a `postgres://` / `postgresql://` target
//!
//! In [`ArchiveMode::Memory`] new keys are buffered and only written by
//! [`Archive::finalize`].

mod postgres;
mod sqlite;

pub use postgres::PostgresArchive;
pub use sqlite::SqliteArchive;

use crate::config::{ArchiveMode, ExtractorConfig};
use crate::error::{ArchiveError, Error, Result};
use crate::extractor::ExtractorInfo;
use crate::formatter::{Formatter, FormatterCache};
use crate::types::{Kwdict, Value};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Item key under which the computed archive key is cached
pub const CACHE_KEY: &str = "_archive_key";

/// Default table name
pub const DEFAULT_TABLE: &str = "archive";

/// Storage backend of a download archive
///
/// Implementations hold a set of unique key strings.
#[async_trait]
pub trait DownloadArchive: Send + Sync {
    /// Whether `key` is stored
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Store `key`; storing an existing key is not an error
    async fn insert(&self, key: &str) -> Result<()>;

    /// Store many keys at once
    async fn insert_all(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.insert(key).await?;
        }
        Ok(())
    }

    /// Release the connection
    async fn close(&self);
}

/// Archive settings resolved from configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveOptions {
    /// Database file path or `postgres://` URL; may contain format fields
    pub target: String,
    /// Key prefix, usually the extractor category
    pub prefix: String,
    /// Key format string
    pub format: String,
    /// Table name; may contain format fields
    pub table: Option<String>,
    /// Write-through or buffered
    pub mode: ArchiveMode,
    /// `PRAGMA` statements applied to SQLite connections
    pub pragma: Vec<String>,
}

impl ArchiveOptions {
    /// Read the `archive*` options; `None` when no archive is configured
    pub fn from_config(config: &ExtractorConfig, info: &ExtractorInfo) -> Result<Option<Self>> {
        let Some(target) = config.string("archive").filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let format = match config.string("archive-format") {
            Some(format) => format.to_string(),
            None if !info.archive_fmt.is_empty() => info.archive_fmt.clone(),
            None => "{filename}.{extension}".to_string(),
        };
        let prefix = config
            .string("archive-prefix")
            .map_or_else(|| info.category.clone(), str::to_string);
        let pragma = match config.get("archive-pragma") {
            None => Vec::new(),
            Some(Value::String(stmt)) => vec![stmt.clone()],
            Some(_) => config
                .get_as::<Vec<String>>("archive-pragma")?
                .unwrap_or_default(),
        };

        Ok(Some(Self {
            target: target.to_string(),
            prefix,
            format,
            table: config.string("archive-table").map(str::to_string),
            mode: config.get_as::<ArchiveMode>("archive-mode")?.unwrap_or_default(),
            pragma,
        }))
    }

    fn is_postgres(target: &str) -> bool {
        target.starts_with("postgres://") || target.starts_with("postgresql://")
    }
}

/// Open the archive described by `options`
///
/// `target` and `table` are formatted with `kwdict` first, so they may
/// depend on the item that triggered the connection.
pub async fn connect(
    options: &ArchiveOptions,
    kwdict: &Kwdict,
    formatters: &FormatterCache,
) -> Result<Archive> {
    let target = formatters.parse(&options.target)?.format_map(kwdict);
    let table = match &options.table {
        Some(table) => formatters.parse(table)?.format_map(kwdict),
        None => DEFAULT_TABLE.to_string(),
    };
    if table.is_empty() {
        return Err(ArchiveError::Invalid("empty archive table name".to_string()).into());
    }
    let keygen = formatters.parse(&format!("{}{}", options.prefix, options.format))?;

    let backend: Box<dyn DownloadArchive> = if ArchiveOptions::is_postgres(&target) {
        Box::new(PostgresArchive::connect(&target, &table).await?)
    } else {
        let path = crate::utils::expand_path(&target);
        Box::new(SqliteArchive::connect(&path, &table, &options.pragma).await?)
    };

    Ok(Archive::new(backend, keygen, options.mode))
}

/// Quote `name` as an SQL identifier
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Download archive front-end: key generation, caching and buffering
pub struct Archive {
    backend: Box<dyn DownloadArchive>,
    keygen: Arc<Formatter>,
    buffer: Option<HashSet<String>>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("keygen", &self.keygen.template())
            .field("buffered", &self.buffer.as_ref().map(HashSet::len))
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Wrap `backend`, deriving keys with `keygen`
    pub fn new(backend: Box<dyn DownloadArchive>, keygen: Arc<Formatter>, mode: ArchiveMode) -> Self {
        let buffer = match mode {
            ArchiveMode::File => None,
            ArchiveMode::Memory => Some(HashSet::new()),
        };
        Self {
            backend,
            keygen,
            buffer,
        }
    }

    /// Archive key of `kwdict`, computed once and cached in the item
    pub fn key(&self, kwdict: &mut Kwdict) -> String {
        if let Some(Value::String(key)) = kwdict.get(CACHE_KEY) {
            return key.clone();
        }
        let key = self.keygen.format_map(kwdict);
        kwdict.insert(CACHE_KEY.to_string(), Value::String(key.clone()));
        key
    }

    /// Whether the item was archived before
    pub async fn check(&self, kwdict: &mut Kwdict) -> Result<bool> {
        let key = self.key(kwdict);
        if let Some(buffer) = &self.buffer
            && buffer.contains(&key)
        {
            return Ok(true);
        }
        self.backend.contains(&key).await
    }

    /// Record the item
    pub async fn add(&mut self, kwdict: &mut Kwdict) -> Result<()> {
        let key = self.key(kwdict);
        match &mut self.buffer {
            Some(buffer) => {
                buffer.insert(key);
                Ok(())
            }
            None => self.backend.insert(&key).await,
        }
    }

    /// Number of keys waiting for [`finalize`](Self::finalize)
    pub fn pending(&self) -> usize {
        self.buffer.as_ref().map_or(0, HashSet::len)
    }

    /// Write buffered keys to the backend
    pub async fn finalize(&mut self) -> Result<()> {
        let Some(buffer) = &mut self.buffer else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = buffer.drain().collect();
        tracing::debug!(count = keys.len(), "writing buffered archive entries");
        self.backend.insert_all(&keys).await
    }

    /// Close the backend; unflushed buffered keys are dropped
    pub async fn close(self) {
        if self.pending() > 0 {
            tracing::debug!(count = self.pending(), "discarding unflushed archive entries");
        }
        self.backend.close().await;
    }
}

impl From<ArchiveError> for crate::job::JobError {
    fn from(e: ArchiveError) -> Self {
        crate::job::JobError::Error(Error::Archive(e))
    }
}

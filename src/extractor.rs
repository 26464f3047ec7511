//! Extractor collaborator interface and registry
//!
//! Extractors are site-specific producers of [`Message`]s. This crate only
//! defines the contract they fulfil and how they are found for a URL; it
//! ships no site implementations.

use crate::error::{Error, Result};
use crate::job::JobResult;
use crate::types::{Message, Value};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Categories that stay reachable even when a blacklist is in effect
pub const SPECIAL_CATEGORIES: [&str; 3] = ["oauth", "recursive", "generic"];

/// Static description of an extractor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractorInfo {
    /// Site name, e.g. `"example"`
    pub category: String,
    /// Kind of resource, e.g. `"gallery"` or `"user"`
    pub subcategory: String,
    /// Shared engine name for sites built on the same software
    pub basecategory: String,
    /// Default directory format strings, one per segment
    pub directory_fmt: Vec<String>,
    /// Default filename format string
    pub filename_fmt: String,
    /// Default archive key format string
    pub archive_fmt: String,
}

impl ExtractorInfo {
    /// Info with the stock formats: `{category}` / `{filename}.{extension}`
    pub fn new(category: impl Into<String>, subcategory: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
            basecategory: String::new(),
            directory_fmt: vec!["{category}".to_string()],
            filename_fmt: "{filename}.{extension}".to_string(),
            archive_fmt: String::new(),
        }
    }

    /// Set the directory format strings
    pub fn with_directory_fmt<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directory_fmt = segments.into_iter().map(Into::into).collect();
        self
    }

    /// Set the filename format string
    pub fn with_filename_fmt(mut self, template: impl Into<String>) -> Self {
        self.filename_fmt = template.into();
        self
    }

    /// Set the archive key format string
    pub fn with_archive_fmt(mut self, template: impl Into<String>) -> Self {
        self.archive_fmt = template.into();
        self
    }

    /// Set the base category
    pub fn with_basecategory(mut self, basecategory: impl Into<String>) -> Self {
        self.basecategory = basecategory.into();
        self
    }
}

/// A site-specific message producer
///
/// `next_message` yields messages in order until it returns `None`. An
/// `Err(JobError::Signal(..))` unwinds job frames the same way a signal raised
/// inside the pipeline does.
#[async_trait]
pub trait Extractor: Send {
    /// Static description
    fn info(&self) -> &ExtractorInfo;

    /// URL this extractor was created for
    fn url(&self) -> &str;

    /// Prepare for extraction (log in, fetch tokens, ...)
    async fn initialize(&mut self) -> JobResult<()> {
        Ok(())
    }

    /// Next message, or `None` when exhausted
    async fn next_message(&mut self) -> Option<JobResult<Message>>;

    /// Release resources after the job finished
    async fn finalize(&mut self) {}

    /// Wait between requests
    async fn sleep(&mut self, seconds: f64) {
        let delay = Duration::try_from_secs_f64(seconds).unwrap_or_default();
        tokio::time::sleep(delay).await;
    }

    /// Skip up to `count` upcoming files without producing them
    ///
    /// Returns how many were actually skipped; the default skips none.
    fn skip(&mut self, _count: u64) -> u64 {
        0
    }
}

/// Constructor for an extractor matching a URL
pub type ExtractorFactory = Arc<dyn Fn(&str) -> Result<Box<dyn Extractor>> + Send + Sync>;

struct Entry {
    category: String,
    subcategory: String,
    pattern: Regex,
    factory: ExtractorFactory,
}

/// Which extractor categories may handle queued URLs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Every extractor
    #[default]
    All,
    /// Only the listed `category` or `category:subcategory` names
    Allow(Vec<String>),
    /// All but the listed names; [`SPECIAL_CATEGORIES`] are always allowed
    Deny(Vec<String>),
}

impl CategoryFilter {
    /// Parse a `whitelist`/`blacklist` value: `"a,b:c"` or `["a", "b:c"]`
    pub fn parse_list(value: &Value) -> Result<Vec<String>> {
        match value {
            Value::String(s) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::config("whitelist", "expected a list of categories"))
                })
                .collect(),
            _ => Err(Error::config(
                "whitelist",
                "expected a string or a list of categories",
            )),
        }
    }

    /// Whether an extractor of `category`/`subcategory` passes the filter
    pub fn permits(&self, category: &str, subcategory: &str) -> bool {
        let listed = |names: &[String]| {
            names.iter().any(|name| match name.split_once(':') {
                Some((cat, sub)) => (cat == category || cat == "*") && sub == subcategory,
                None => name == category,
            })
        };
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Allow(names) => listed(names),
            CategoryFilter::Deny(names) => {
                SPECIAL_CATEGORIES.contains(&category) || !listed(names)
            }
        }
    }
}

/// Ordered collection of extractor constructors keyed by URL pattern
#[derive(Default)]
pub struct ExtractorRegistry {
    entries: Vec<Entry>,
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|e| format!("{}:{} {}", e.category, e.subcategory, e.pattern)),
            )
            .finish()
    }
}

impl ExtractorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for URLs matching `pattern`
    ///
    /// Earlier registrations take precedence.
    pub fn register(
        &mut self,
        category: impl Into<String>,
        subcategory: impl Into<String>,
        pattern: &str,
        factory: ExtractorFactory,
    ) -> Result<()> {
        let category = category.into();
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::Other(format!("invalid URL pattern for extractor '{category}': {e}"))
        })?;
        self.entries.push(Entry {
            category,
            subcategory: subcategory.into(),
            pattern,
            factory,
        });
        Ok(())
    }

    /// Number of registered extractors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no extractor is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create the first permitted extractor matching `url`
    pub fn find(&self, url: &str, filter: &CategoryFilter) -> Result<Option<Box<dyn Extractor>>> {
        for entry in &self.entries {
            if filter.permits(&entry.category, &entry.subcategory) && entry.pattern.is_match(url) {
                return (entry.factory)(url).map(Some);
            }
        }
        Ok(None)
    }

    /// Create an extractor of `category` for `url`, ignoring URL patterns
    ///
    /// Used when an item names the extractor to handle its URL.
    pub fn by_category(&self, category: &str, url: &str) -> Result<Option<Box<dyn Extractor>>> {
        let mut candidates = self.entries.iter().filter(|e| e.category == category);
        let Some(first) = candidates.next() else {
            return Ok(None);
        };
        let entry = std::iter::once(first)
            .chain(candidates)
            .find(|e| e.pattern.is_match(url))
            .unwrap_or(first);
        (entry.factory)(url).map(Some)
    }
}

//! What a job does with the messages of its extractor
//!
//! The kind is chosen for the root job and inherited by every child, so a
//! URL listing descends into queued URLs instead of downloading them.

use crate::error::Result;
use crate::types::{Kwdict, Value};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Destination of the listing job kinds
pub type JobOutput = Arc<Mutex<dyn Write + Send>>;

/// Behavior shared by every job of a tree
#[derive(Clone, Default)]
pub enum JobKind {
    /// Download files, run hooks and record them in the archive
    #[default]
    Download,
    /// Write the URL of every file, fallbacks prefixed with `| `
    Urls(JobOutput),
    /// Write the metadata of each directory and of the first file
    Keywords(JobOutput),
}

impl JobKind {
    /// List URLs to `output`
    pub fn urls(output: impl Write + Send + 'static) -> Self {
        Self::Urls(Arc::new(Mutex::new(output)))
    }

    /// List metadata to `output`
    pub fn keywords(output: impl Write + Send + 'static) -> Self {
        Self::Keywords(Arc::new(Mutex::new(output)))
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Urls(_) => "urls",
            JobKind::Keywords(_) => "keywords",
        }
    }
}

impl fmt::Debug for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Write `url` followed by its fallback URLs
pub(crate) fn write_urls(output: &JobOutput, url: &str, fallbacks: &[String]) -> Result<()> {
    let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(out, "{url}")?;
    for fallback in fallbacks {
        writeln!(out, "| {fallback}")?;
    }
    out.flush()?;
    Ok(())
}

/// Write `kwdict` under `heading`, sorted by key with aligned values
pub(crate) fn write_keywords(output: &JobOutput, heading: &str, kwdict: &Kwdict) -> Result<()> {
    let mut entries: Vec<(&String, &Value)> = kwdict.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let width = entries
        .iter()
        .map(|(key, _)| key.chars().count())
        .max()
        .unwrap_or(0)
        + 1;

    let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(out, "{heading}")?;
    for (key, value) in entries {
        let pad = width - key.chars().count();
        match value {
            Value::String(s) => writeln!(out, "{key}:{:pad$}{s}", "")?,
            other => writeln!(out, "{key}:{:pad$}{other}", "")?,
        }
    }
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

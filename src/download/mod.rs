//! Downloader collaborators
//!
//! A [`Downloader`] fetches one URL into the temporary path of a
//! [`PathFormat`]. Downloaders are looked up by URL scheme in a
//! [`DownloaderRegistry`]; whether anything is downloaded at all is decided
//! once per job by its [`DownloadStrategy`].
//!
//! Returning `Ok(true)` with an empty `temppath` means the file turned out to
//! be present already and there is nothing to finalize.

mod http;
mod text;

pub use http::{HttpDownloader, HttpOptions};
pub use text::TextDownloader;

use crate::config::ExtractorConfig;
use crate::error::Result;
use crate::path::PathFormat;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Fetches a URL into `pathfmt.temppath()`
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url`
    ///
    /// `Ok(false)` reports a failed attempt the caller may retry with a
    /// fallback URL; `Err` is reserved for local failures such as I/O errors.
    async fn download(&self, url: &str, pathfmt: &mut PathFormat) -> Result<bool>;
}

/// Downloaders keyed by URL scheme
#[derive(Clone, Default)]
pub struct DownloaderRegistry {
    schemes: HashMap<String, Arc<dyn Downloader>>,
}

impl fmt::Debug for DownloaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.schemes.keys().collect();
        schemes.sort();
        f.debug_struct("DownloaderRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl DownloaderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `http`, `https` and `text` downloaders
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let mut registry = Self::new();
        let http: Arc<dyn Downloader> = Arc::new(HttpDownloader::from_config(config)?);
        registry.register("http", Arc::clone(&http));
        registry.register("https", http);
        registry.register("text", Arc::new(TextDownloader));
        Ok(registry)
    }

    /// Use `downloader` for URLs with `scheme`
    pub fn register(&mut self, scheme: impl Into<String>, downloader: Arc<dyn Downloader>) {
        self.schemes.insert(scheme.into().to_ascii_lowercase(), downloader);
    }

    /// Downloader responsible for `url`
    pub fn get(&self, url: &str) -> Option<Arc<dyn Downloader>> {
        let scheme = scheme_of(url)?;
        self.schemes.get(&scheme.to_ascii_lowercase()).cloned()
    }
}

fn scheme_of(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once(':')?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// Whether a job downloads files at all
#[derive(Clone, Debug)]
pub enum DownloadStrategy {
    /// `download: false`; only resolve the final path
    Disabled,
    /// Fetch through the registry
    Enabled(Arc<DownloaderRegistry>),
}

/// Outcome of [`DownloadStrategy::download`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file is in `temppath` (or nothing needs to be done)
    Done,
    /// This URL failed; a fallback may be tried
    Failed,
    /// No downloader handles the URL scheme
    Unsupported,
}

impl DownloadStrategy {
    /// Download `url` according to the strategy
    pub async fn download(&self, url: &str, pathfmt: &mut PathFormat) -> Result<DownloadOutcome> {
        match self {
            DownloadStrategy::Disabled => {
                pathfmt.fix_extension()?;
                Ok(DownloadOutcome::Done)
            }
            DownloadStrategy::Enabled(registry) => {
                let Some(downloader) = registry.get(url) else {
                    return Ok(DownloadOutcome::Unsupported);
                };
                if downloader.download(url, pathfmt).await? {
                    Ok(DownloadOutcome::Done)
                } else {
                    Ok(DownloadOutcome::Failed)
                }
            }
        }
    }

    /// Whether files are downloaded
    pub fn is_enabled(&self) -> bool {
        matches!(self, DownloadStrategy::Enabled(_))
    }
}

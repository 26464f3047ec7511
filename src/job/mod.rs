//! Job execution
//!
//! A [`Job`] drives one extractor and every job spawned by its queued URLs.
//! Children run to completion before their parent continues; the running
//! frames are kept on an explicit stack so control-flow signals can unwind
//! any number of them.

mod control;
mod frame;
mod hooks;
mod kind;
mod predicate;

pub use control::{ControlFlow, JobError, JobResult};
pub use hooks::{Hook, Hooks, PostProcessor, PostProcessorFactory, PostProcessorRegistry};
pub use kind::{JobKind, JobOutput};
pub use predicate::{
    FilterPredicate, IndexRange, Predicates, RangePredicate, UniquePredicate, optimize_range,
    parse_range,
};

use crate::config::Config;
use crate::download::DownloaderRegistry;
use crate::error::{Error, Result};
use crate::extractor::{CategoryFilter, Extractor, ExtractorInfo, ExtractorRegistry};
use crate::formatter::FormatterCache;
use crate::types::JobStatus;
use control::Unwind;
use frame::{Ending, Frame, Lineage, Step};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Collaborators shared by every job of a tree
#[derive(Debug)]
pub struct JobContext {
    /// Layered configuration
    pub config: Arc<Config>,
    /// Extractors for queued URLs
    pub extractors: Arc<ExtractorRegistry>,
    /// Compiled format strings
    pub formatters: Arc<FormatterCache>,
    /// Downloaders by scheme; `None` builds the stock set per job from its configuration
    pub downloaders: Option<Arc<DownloaderRegistry>>,
    /// Post-processors available to the `postprocessors` option
    pub postprocessors: Arc<PostProcessorRegistry>,
}

impl JobContext {
    /// Context with a fresh formatter cache and no post-processors
    pub fn new(config: Config, extractors: ExtractorRegistry) -> Self {
        Self {
            config: Arc::new(config),
            extractors: Arc::new(extractors),
            formatters: Arc::new(FormatterCache::new()),
            downloaders: None,
            postprocessors: Arc::new(PostProcessorRegistry::new()),
        }
    }

    /// Share an existing formatter cache
    pub fn with_formatters(mut self, formatters: Arc<FormatterCache>) -> Self {
        self.formatters = formatters;
        self
    }

    /// Use `downloaders` for every job instead of the stock set
    pub fn with_downloaders(mut self, downloaders: DownloaderRegistry) -> Self {
        self.downloaders = Some(Arc::new(downloaders));
        self
    }

    /// Make the post-processors in `registry` available
    pub fn with_postprocessors(mut self, registry: PostProcessorRegistry) -> Self {
        self.postprocessors = Arc::new(registry);
        self
    }
}

/// Root of a job tree
pub struct Job {
    ctx: Arc<JobContext>,
    root: Frame,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("category", &self.root.info().category)
            .field("subcategory", &self.root.info().subcategory)
            .finish()
    }
}

impl Job {
    /// Create a download job for the first extractor matching `url`
    pub fn new(ctx: Arc<JobContext>, url: &str) -> Result<Self> {
        Self::with_kind(ctx, url, JobKind::Download)
    }

    /// Create a job of `kind` for the first extractor matching `url`
    ///
    /// Jobs spawned for queued URLs are of the same kind.
    pub fn with_kind(ctx: Arc<JobContext>, url: &str, kind: JobKind) -> Result<Self> {
        let extractor = ctx
            .extractors
            .find(url, &CategoryFilter::All)?
            .ok_or_else(|| Error::NoExtractor(url.to_string()))?;
        Self::from_extractor_with_kind(ctx, extractor, kind)
    }

    /// Create a download job for an already constructed extractor
    pub fn from_extractor(ctx: Arc<JobContext>, extractor: Box<dyn Extractor>) -> Result<Self> {
        Self::from_extractor_with_kind(ctx, extractor, JobKind::Download)
    }

    /// Create a job of `kind` for an already constructed extractor
    pub fn from_extractor_with_kind(
        ctx: Arc<JobContext>,
        extractor: Box<dyn Extractor>,
        kind: JobKind,
    ) -> Result<Self> {
        let lineage = Lineage {
            kind,
            ..Lineage::default()
        };
        let root = Frame::new(Arc::clone(&ctx), extractor, lineage)?;
        Ok(Self { ctx, root })
    }

    /// Extractor description of the root job, after category transfer
    pub fn info(&self) -> &ExtractorInfo {
        self.root.info()
    }

    /// Run the job tree to completion
    ///
    /// Returns the root job's status with the bits of all its children.
    /// An exit request from a skip breaker or extractor is reported as
    /// [`Error::Exit`].
    pub async fn run(self) -> Result<JobStatus> {
        let Job { ctx, root } = self;
        info!(category = %root.info().category, url = %root.seed_url(), "starting job");

        let mut visited = HashSet::new();
        let mut stack: Vec<Box<Frame>> = vec![Box::new(root)];

        while let Some(frame) = stack.last_mut() {
            let ending = match frame.step(&mut visited).await {
                Step::Continue => continue,
                Step::Spawn(child) => {
                    stack.push(child);
                    continue;
                }
                Step::End(ending) => ending,
            };

            let Some(frame) = stack.pop() else {
                break;
            };
            let seed = frame.seed();
            let mut status = frame.finish().await;

            let unwind = match ending {
                Ending::Done(unwind) => unwind,
                Ending::Restart => match Frame::rebuild(Arc::clone(&ctx), seed) {
                    Ok(fresh) => {
                        stack.push(Box::new(fresh));
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "cannot restart job");
                        status |= e.status_bit();
                        Unwind::None
                    }
                },
            };

            match stack.last_mut() {
                Some(parent) if unwind.ends_parent() => parent.unwind(status, unwind.propagate()),
                Some(parent) => parent.child_finished(status).await,
                None => {
                    return match unwind {
                        Unwind::Exit(code) => Err(Error::Exit(code)),
                        _ => Ok(status),
                    };
                }
            }
        }
        Ok(JobStatus::empty())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

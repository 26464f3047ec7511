//! One job of the job tree
//!
//! A frame owns an extractor and everything needed to turn its messages into
//! files. The worklist in [`Job::run`](super::Job::run) drives frames one
//! message at a time through [`Frame::step`].

use super::control::{ControlFlow, JobError, JobResult, Unwind};
use super::hooks::Hooks;
use super::kind::{self, JobKind};
use super::predicate::Predicates;
use super::JobContext;
use crate::archive::{self, Archive, ArchiveOptions};
use crate::config::{ArchiveEvents, ExtractorConfig, SkipBreaker, SkipSetting, SleepSetting};
use crate::download::{DownloadOutcome, DownloadStrategy, DownloaderRegistry};
use crate::error::{Error, Result};
use crate::extractor::{CategoryFilter, Extractor, ExtractorInfo};
use crate::formatter::Expression;
use crate::path::PathFormat;
use crate::types::{HookEvent, JobState, JobStatus, Kwdict, Message, Value};
use crate::utils;
use rand::Rng;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a frame ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Ending {
    /// Finished; the parent receives this unwinding request
    Done(Unwind),
    /// Run a freshly built frame for the same URL in its place
    Restart,
}

/// Result of one [`Frame::step`]
pub(crate) enum Step {
    /// Keep stepping this frame
    Continue,
    /// Run this child to completion first
    Spawn(Box<Frame>),
    /// This frame is over
    End(Ending),
}

/// What a child inherits from its parent
#[derive(Clone, Debug, Default)]
pub(crate) struct Lineage {
    /// Categories of all ancestors, root first
    pub(crate) parents: Vec<String>,
    /// Base directory replacing `base-directory`
    pub(crate) parent_directory: Option<String>,
    /// Metadata merged into every item
    pub(crate) kwdict: Kwdict,
    /// Category and subcategory taken over from the parent
    pub(crate) transfer: Option<(String, String)>,
    /// Item key receiving the message URL
    pub(crate) metadata_url: Option<String>,
    /// Behavior of the whole tree
    pub(crate) kind: JobKind,
}

/// Enough to build the frame again after a restart
#[derive(Clone, Debug)]
pub(crate) struct Seed {
    url: String,
    category: String,
    lineage: Lineage,
}

/// Consecutive-skip counter behind `skip: "abort:N"` and friends
#[derive(Debug, Default)]
struct SkipStreak {
    breaker: Option<SkipBreaker>,
    filter: Option<Expression>,
    count: u32,
}

impl SkipStreak {
    fn record(&mut self, kwdict: &Kwdict) -> JobResult<()> {
        let Some(breaker) = self.breaker else {
            return Ok(());
        };
        if let Some(filter) = &self.filter {
            let counts = filter.eval_bool(kwdict).map_err(|reason| Error::Filter {
                expression: filter.source().to_string(),
                reason,
            })?;
            if !counts {
                return Ok(());
            }
        }

        self.count += 1;
        if self.count < breaker.threshold() {
            return Ok(());
        }
        self.count = 0;
        let signal = match breaker {
            SkipBreaker::Abort { depth, .. } => ControlFlow::StopLocal { depth },
            SkipBreaker::Terminate { .. } => ControlFlow::Terminate,
            SkipBreaker::Exit { .. } => ControlFlow::Exit(1),
        };
        debug!(?signal, "skip limit reached");
        Err(JobError::Signal(signal))
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// State of a single job
pub(crate) struct Frame {
    ctx: Arc<JobContext>,
    extractor: Box<dyn Extractor>,
    info: ExtractorInfo,
    config: ExtractorConfig,
    seed: Seed,
    kind: JobKind,
    state: JobState,
    status: JobStatus,
    ending: Option<Ending>,
    messages: u64,

    kwdict: Kwdict,
    metadata_url: Option<String>,
    pathfmt: Option<PathFormat>,
    archive: Option<Archive>,
    archive_events: ArchiveEvents,
    hooks: Hooks,
    downloads: DownloadStrategy,

    image: Predicates,
    chapter: Predicates,
    fallback: bool,
    sleep: Option<(f64, f64)>,
    skip: SkipStreak,

    extractor_filter: Option<CategoryFilter>,
    pending: Option<Kwdict>,
}

impl Frame {
    /// Build a frame for `extractor`
    pub(crate) fn new(
        ctx: Arc<JobContext>,
        extractor: Box<dyn Extractor>,
        lineage: Lineage,
    ) -> Result<Self> {
        let seed = Seed {
            url: extractor.url().to_string(),
            category: extractor.info().category.clone(),
            lineage: lineage.clone(),
        };

        let mut info = extractor.info().clone();
        if let Some((category, subcategory)) = lineage.transfer {
            info.category = category;
            info.subcategory = subcategory;
        }
        let config = ExtractorConfig::for_extractor(
            Arc::clone(&ctx.config),
            &info.category,
            &info.subcategory,
        );

        let mut kwdict = Kwdict::new();
        if let Some(Value::Object(keywords)) = config.get("keywords") {
            kwdict.extend(keywords.clone());
        }
        kwdict.extend(lineage.kwdict);

        let kind = lineage.kind;
        let downloads = if matches!(kind, JobKind::Download) && config.bool("download", true) {
            let registry = match &ctx.downloaders {
                Some(registry) => Arc::clone(registry),
                None => Arc::new(DownloaderRegistry::from_config(&config)?),
            };
            DownloadStrategy::Enabled(registry)
        } else {
            DownloadStrategy::Disabled
        };

        let skip = match config.get_as::<SkipSetting>("skip")? {
            Some(setting) => setting.parse()?,
            None => Default::default(),
        };
        let skip_filter = config
            .string("skip-filter")
            .map(Expression::parse)
            .transpose()?;
        let sleep = match config.get_as::<SleepSetting>("sleep")? {
            Some(setting) => setting.bounds()?,
            None => None,
        };

        let metadata_url = lineage
            .metadata_url
            .or_else(|| config.string("metadata-url").map(str::to_string));

        debug!(
            category = %info.category,
            subcategory = %info.subcategory,
            url = %seed.url,
            kind = kind.name(),
            parents = ?lineage.parents,
            "created job"
        );

        Ok(Self {
            image: Predicates::from_config(&config, "image", true)?,
            chapter: Predicates::from_config(&config, "chapter", false)?,
            fallback: config.bool("fallback", true),
            ctx,
            extractor,
            info,
            config,
            seed,
            kind,
            state: JobState::Constructed,
            status: JobStatus::empty(),
            ending: None,
            messages: 0,
            kwdict,
            metadata_url,
            pathfmt: None,
            archive: None,
            archive_events: ArchiveEvents::default(),
            hooks: Hooks::new(),
            downloads,
            sleep,
            skip: SkipStreak {
                breaker: skip.breaker,
                filter: skip_filter,
                count: 0,
            },
            extractor_filter: None,
            pending: None,
        })
    }

    /// Build a fresh frame from the seed of a restarted one
    pub(crate) fn rebuild(ctx: Arc<JobContext>, seed: Seed) -> Result<Self> {
        let extractor = ctx
            .extractors
            .by_category(&seed.category, &seed.url)?
            .ok_or_else(|| Error::NoExtractor(seed.url.clone()))?;
        Self::new(ctx, extractor, seed.lineage)
    }

    pub(crate) fn seed(&self) -> Seed {
        self.seed.clone()
    }

    pub(crate) fn seed_url(&self) -> &str {
        &self.seed.url
    }

    pub(crate) fn info(&self) -> &ExtractorInfo {
        &self.info
    }

    /// Advance by one message
    pub(crate) async fn step(&mut self, visited: &mut HashSet<String>) -> Step {
        if let Some(ending) = self.ending.take() {
            return Step::End(ending);
        }

        match self.state {
            JobState::Constructed => {
                self.state = JobState::Initializing;
                if let Err(e) = self.extractor.initialize().await {
                    return self.handle_error(e);
                }
                let skipped = self.image.prime(self.extractor.as_mut());
                if skipped > 0 {
                    debug!(skipped, "extractor skipped leading files");
                }
                self.state = JobState::Running;
                Step::Continue
            }
            JobState::Initializing | JobState::Running => {
                let Some(message) = self.extractor.next_message().await else {
                    if self.messages == 0 {
                        info!(url = %self.seed.url, "no results");
                    }
                    return Step::End(Ending::Done(Unwind::None));
                };
                self.messages += 1;
                let result = match message {
                    Ok(message) => self.dispatch(message, visited).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(Some(child)) => Step::Spawn(child),
                    Ok(None) => Step::Continue,
                    Err(e) => self.handle_error(e),
                }
            }
            JobState::Finalizing | JobState::Done => Step::End(Ending::Done(Unwind::None)),
        }
    }

    /// Interpret an error or signal raised while handling a message
    fn handle_error(&mut self, err: JobError) -> Step {
        let category = &self.info.category;
        match err {
            JobError::Signal(ControlFlow::Continue) => Step::Continue,
            JobError::Signal(ControlFlow::StopLocal { depth }) => {
                debug!(%category, depth, "stopping extraction");
                let unwind = if depth > 1 {
                    Unwind::Frames(depth - 1)
                } else {
                    Unwind::None
                };
                Step::End(Ending::Done(unwind))
            }
            JobError::Signal(ControlFlow::Terminate) => {
                debug!(%category, "terminating job tree");
                Step::End(Ending::Done(Unwind::All))
            }
            JobError::Signal(ControlFlow::Restart) => {
                info!(%category, url = %self.seed.url, "restarting extraction");
                Step::End(Ending::Restart)
            }
            JobError::Signal(ControlFlow::Abort(message)) => {
                error!(%category, "{message}");
                self.status |= JobStatus::ABORTED;
                Step::Continue
            }
            JobError::Signal(ControlFlow::Exit(code)) => {
                debug!(%category, code, "exit requested");
                Step::End(Ending::Done(Unwind::Exit(code)))
            }
            JobError::Error(e) if e.is_out_of_space() => {
                error!(%category, error = %e, "out of disk space");
                self.status |= e.status_bit();
                Step::End(Ending::Done(Unwind::All))
            }
            JobError::Error(e) if e.is_item_local() => {
                error!(%category, error = %e, "skipping item");
                self.status |= e.status_bit();
                Step::Continue
            }
            JobError::Error(e) => {
                match &e {
                    Error::Io(io) => error!(%category, kind = ?io.kind(), error = %io, "I/O error"),
                    _ => error!(%category, error = %e, "extraction failed"),
                }
                self.status |= e.status_bit();
                Step::End(Ending::Done(Unwind::None))
            }
        }
    }

    async fn dispatch(
        &mut self,
        message: Message,
        visited: &mut HashSet<String>,
    ) -> JobResult<Option<Box<Frame>>> {
        match message {
            Message::Directory(mut kwdict) => {
                self.update_kwdict(&mut kwdict);
                match self.kind.clone() {
                    JobKind::Download => self.handle_directory(kwdict).await?,
                    JobKind::Urls(_) => {}
                    JobKind::Keywords(output) => {
                        kind::write_keywords(&output, "Keywords for directory names:", &kwdict)?;
                    }
                }
            }
            Message::Url(url, mut kwdict) => {
                self.set_metadata_url(&url, &mut kwdict);
                if self.image.test(&url, &kwdict)? {
                    self.update_kwdict(&mut kwdict);
                    self.handle_file(url, kwdict).await?;
                }
            }
            Message::Urllist(urls, mut kwdict) => {
                let mut urls = urls.into_iter();
                let Some(url) = urls.next() else {
                    return Ok(None);
                };
                self.set_metadata_url(&url, &mut kwdict);
                if self.image.test(&url, &kwdict)? {
                    self.update_kwdict(&mut kwdict);
                    let rest: Vec<Value> = urls.map(Value::String).collect();
                    kwdict.insert("_fallback".to_string(), Value::Array(rest));
                    self.handle_file(url, kwdict).await?;
                }
            }
            Message::Queue(url, _) if matches!(self.kind, JobKind::Keywords(_)) => {
                debug!(%url, "not descending into queued URL");
            }
            Message::Queue(url, mut kwdict) => {
                self.set_metadata_url(&url, &mut kwdict);
                if self.chapter.test(&url, &kwdict)? {
                    return self.handle_queue(url, kwdict, visited);
                }
            }
            Message::Version(1) => {}
            Message::Version(version) => {
                return Err(Error::UnsupportedVersion {
                    version,
                    category: self.info.category.clone(),
                }
                .into());
            }
        }
        Ok(None)
    }

    fn set_metadata_url(&self, url: &str, kwdict: &mut Kwdict) {
        if let Some(key) = &self.metadata_url {
            kwdict.insert(key.clone(), Value::String(url.to_string()));
        }
    }

    fn update_kwdict(&self, kwdict: &mut Kwdict) {
        kwdict.insert(
            "category".to_string(),
            Value::String(self.info.category.clone()),
        );
        kwdict.insert(
            "subcategory".to_string(),
            Value::String(self.info.subcategory.clone()),
        );
        for (key, value) in &self.kwdict {
            kwdict.insert(key.clone(), value.clone());
        }
    }

    /// Create the path format, archive and hooks for the first directory
    ///
    /// A path format that cannot be built ends the frame at its next step.
    async fn initialize(&mut self, kwdict: &Kwdict) -> JobResult<()> {
        let built = PathFormat::new(
            &self.info,
            &self.config,
            &self.ctx.formatters,
            self.seed.lineage.parent_directory.as_deref(),
        );
        let mut pathfmt = match built {
            Ok(pathfmt) => pathfmt,
            Err(e) => {
                error!(category = %self.info.category, error = %e, "invalid path format");
                self.status |= e.status_bit();
                self.ending = Some(Ending::Done(Unwind::None));
                return Ok(());
            }
        };
        pathfmt.set_directory(kwdict)?;
        *pathfmt.kwdict_mut() = kwdict.clone();

        if let Some(options) = ArchiveOptions::from_config(&self.config, &self.info)? {
            match archive::connect(&options, kwdict, &self.ctx.formatters).await {
                Ok(archive) => self.archive = Some(archive),
                Err(e) => warn!(target = %options.target, error = %e, "failed to open download archive"),
            }
            if let Some(events) = self.config.get("archive-event") {
                self.archive_events = ArchiveEvents::from_value(events)?;
            }
        }

        for processor in self.ctx.postprocessors.build(&self.config)? {
            debug!(name = processor.name(), "using post-processor");
            processor.register(&mut self.hooks);
        }

        let pathfmt = self.pathfmt.insert(pathfmt);
        self.hooks.run(HookEvent::Init, pathfmt)
    }

    async fn handle_directory(&mut self, kwdict: Kwdict) -> JobResult<()> {
        if self.pathfmt.is_none() {
            self.initialize(&kwdict).await?;
        } else if let Some(pathfmt) = self.pathfmt.as_mut() {
            self.hooks.run(HookEvent::PostAfter, pathfmt)?;
            pathfmt.set_directory(&kwdict)?;
            *pathfmt.kwdict_mut() = kwdict;
        }
        if let Some(pathfmt) = self.pathfmt.as_mut() {
            self.hooks.run(HookEvent::Post, pathfmt)?;
        }
        Ok(())
    }

    /// Hand a file to the handler of this job's kind
    async fn handle_file(&mut self, url: String, kwdict: Kwdict) -> JobResult<()> {
        match self.kind.clone() {
            JobKind::Download => self.handle_url(url, kwdict).await,
            JobKind::Urls(output) => Ok(kind::write_urls(&output, &url, &fallback_urls(&kwdict))?),
            JobKind::Keywords(output) => {
                kind::write_keywords(&output, "Keywords for filenames:", &kwdict)?;
                Err(JobError::Signal(ControlFlow::stop()))
            }
        }
    }

    async fn handle_url(&mut self, url: String, kwdict: Kwdict) -> JobResult<()> {
        if self.pathfmt.is_none() {
            self.initialize(&kwdict).await?;
        }
        let Some(pathfmt) = self.pathfmt.as_mut() else {
            return Ok(());
        };
        let hooks = &mut self.hooks;

        pathfmt.set_filename(kwdict);
        hooks.run(HookEvent::Prepare, pathfmt)?;

        if let Some(archive) = &self.archive
            && archive.check(pathfmt.kwdict_mut()).await?
        {
            pathfmt.fix_extension()?;
            return self.handle_skip().await;
        }

        if !pathfmt.extension().is_empty() {
            pathfmt.build_path()?;
            if pathfmt.exists()? {
                return self.handle_skip_existing().await;
            }
        }

        if hooks.contains(HookEvent::PrepareAfter) {
            hooks.run(HookEvent::PrepareAfter, pathfmt)?;
            let recheck = pathfmt
                .kwdict_mut()
                .remove("_file_recheck")
                .is_some_and(|v| is_truthy(&v));
            if recheck && pathfmt.exists()? {
                return self.handle_skip_existing().await;
            }
        }

        if let Some((lo, hi)) = self.sleep {
            let seconds = if lo < hi {
                rand::thread_rng().gen_range(lo..=hi)
            } else {
                lo
            };
            self.extractor.sleep(seconds).await;
        }

        let mut success = download(&self.downloads, &url, pathfmt).await?;
        if !success && self.fallback {
            let fallbacks = fallback_urls(pathfmt.kwdict());
            for (num, fallback) in fallbacks.iter().enumerate() {
                utils::remove_file(Path::new(pathfmt.temppath()))?;
                info!(num = num + 1, url = %fallback, "trying fallback URL");
                if download(&self.downloads, fallback, pathfmt).await? {
                    success = true;
                    break;
                }
            }
        }
        if !success {
            self.status |= JobStatus::DOWNLOAD_FAILED;
            let name = if pathfmt.filename().is_empty() {
                url.as_str()
            } else {
                pathfmt.filename()
            };
            error!(file = %name, "failed to download");
            return hooks.run(HookEvent::Error, pathfmt);
        }

        if pathfmt.temppath().is_empty() {
            return self.handle_skip_existing().await;
        }

        hooks.run(HookEvent::File, pathfmt)?;
        pathfmt.finalize()?;
        info!(path = %pathfmt.path(), "downloaded");
        self.skip.reset();

        if self.archive_events.file
            && let Some(archive) = &mut self.archive
        {
            archive.add(pathfmt.kwdict_mut()).await?;
        }
        hooks.run(HookEvent::After, pathfmt)?;
        if self.archive_events.after
            && let Some(archive) = &mut self.archive
        {
            archive.add(pathfmt.kwdict_mut()).await?;
        }
        Ok(())
    }

    /// Skip a file that already exists, archiving it for `skip` events
    async fn handle_skip_existing(&mut self) -> JobResult<()> {
        if self.archive_events.skip
            && let (Some(archive), Some(pathfmt)) = (&mut self.archive, &mut self.pathfmt)
        {
            archive.add(pathfmt.kwdict_mut()).await?;
        }
        self.handle_skip().await
    }

    async fn handle_skip(&mut self) -> JobResult<()> {
        let Some(pathfmt) = self.pathfmt.as_mut() else {
            return Ok(());
        };
        info!(path = %pathfmt.path(), "skipped");
        self.hooks.run(HookEvent::Skip, pathfmt)?;
        self.skip.record(pathfmt.kwdict())
    }

    fn handle_queue(
        &mut self,
        url: String,
        kwdict: Kwdict,
        visited: &mut HashSet<String>,
    ) -> JobResult<Option<Box<Frame>>> {
        if visited.contains(&url) {
            debug!(%url, "already visited");
            return Ok(None);
        }
        visited.insert(url.clone());

        let extractor = match kwdict.get("_extractor").and_then(Value::as_str) {
            Some(category) => self.ctx.extractors.by_category(category, &url)?,
            None => {
                let filter = self.extractor_filter()?.clone();
                self.ctx.extractors.find(&url, &filter)?
            }
        };
        let Some(extractor) = extractor else {
            warn!(%url, "unsupported URL");
            self.status |= JobStatus::NO_EXTRACTOR;
            return Ok(None);
        };

        let lineage = self.child_lineage(&kwdict)?;
        match Frame::new(Arc::clone(&self.ctx), extractor, lineage) {
            Ok(child) => {
                self.pending = Some(kwdict);
                Ok(Some(Box::new(child)))
            }
            Err(e) => {
                error!(%url, error = %e, "cannot create child job");
                self.status |= e.status_bit();
                Ok(None)
            }
        }
    }

    fn extractor_filter(&mut self) -> Result<&CategoryFilter> {
        if self.extractor_filter.is_none() {
            let filter = if let Some(list) = self.config.get("whitelist") {
                CategoryFilter::Allow(CategoryFilter::parse_list(list)?)
            } else if let Some(list) = self.config.get("blacklist") {
                CategoryFilter::Deny(CategoryFilter::parse_list(list)?)
            } else {
                CategoryFilter::Deny(vec![self.info.category.clone()])
            };
            self.extractor_filter = Some(filter);
        }
        Ok(self.extractor_filter.get_or_insert(CategoryFilter::All))
    }

    fn child_lineage(&self, item: &Kwdict) -> Result<Lineage> {
        let mut parents = self.seed.lineage.parents.clone();
        parents.push(self.info.category.clone());

        let parent_directory = if self.config.bool("parent-directory", false) {
            self.pathfmt.as_ref().map(|p| p.directory().to_string())
        } else {
            None
        };

        let mut kwdict = Kwdict::new();
        match self.config.get("parent-metadata") {
            Some(Value::String(key)) if !key.is_empty() => {
                let mut data = self.kwdict.clone();
                data.extend(item.clone());
                kwdict.insert(key.clone(), Value::Object(data));
            }
            Some(_) if self.config.bool("parent-metadata", false) => {
                kwdict.extend(self.kwdict.clone());
                kwdict.extend(item.clone());
            }
            _ => {}
        }

        let transfer = self
            .config
            .bool("category-transfer", false)
            .then(|| (self.info.category.clone(), self.info.subcategory.clone()));

        Ok(Lineage {
            parents,
            parent_directory,
            kwdict,
            transfer,
            metadata_url: self.metadata_url.clone(),
            kind: self.kind.clone(),
        })
    }

    /// Absorb the status of a finished child and run fallback recovery
    pub(crate) async fn child_finished(&mut self, status: JobStatus) {
        self.status |= status;
        let Some(mut kwdict) = self.pending.take() else {
            return;
        };
        if !self.fallback || !status.intersects(JobStatus::FALLBACK_ELIGIBLE) {
            return;
        }
        let mut fallbacks = fallback_urls(&kwdict).into_iter();
        let Some(url) = fallbacks.next() else {
            return;
        };

        info!(%url, "child job failed, trying fallback URL");
        utils::nameext_from_url(&url, &mut kwdict);
        kwdict.insert(
            "_fallback".to_string(),
            Value::Array(fallbacks.map(Value::String).collect()),
        );
        self.update_kwdict(&mut kwdict);
        if let Err(e) = self.handle_file(url, kwdict).await
            && let Step::End(ending) = self.handle_error(e)
        {
            self.ending = Some(ending);
        }
    }

    /// End this frame at its next step because a descendant unwound through it
    pub(crate) fn unwind(&mut self, status: JobStatus, unwind: Unwind) {
        self.status |= status;
        self.pending = None;
        self.ending = Some(Ending::Done(unwind));
    }

    /// Run the finalize hooks, close the archive and release the extractor
    pub(crate) async fn finish(mut self) -> JobStatus {
        self.state = JobState::Finalizing;

        if let Some(pathfmt) = self.pathfmt.as_mut() {
            let outcome = if self.status.is_empty() {
                HookEvent::FinalizeSuccess
            } else {
                HookEvent::FinalizeError
            };
            for event in [HookEvent::PostAfter, outcome, HookEvent::Finalize] {
                if let Err(e) = self.hooks.run(event, pathfmt) {
                    match e {
                        JobError::Error(e) => {
                            error!(%event, error = %e, "hook failed");
                            self.status |= e.status_bit();
                        }
                        JobError::Signal(signal) => {
                            debug!(%event, ?signal, "signal from finalize hook ignored");
                        }
                    }
                }
            }
        }

        if let Some(mut archive) = self.archive.take() {
            if self.status.is_empty()
                && let Err(e) = archive.finalize().await
            {
                warn!(error = %e, "failed to write archive entries");
                self.status |= e.status_bit();
            }
            archive.close().await;
        }

        self.extractor.finalize().await;
        self.state = JobState::Done;
        debug!(category = %self.info.category, status = %self.status, "job finished");
        self.status
    }
}

/// Download `url` with `strategy`; download-local failures count as `false`
async fn download(
    strategy: &DownloadStrategy,
    url: &str,
    pathfmt: &mut PathFormat,
) -> JobResult<bool> {
    match strategy.download(url, pathfmt).await {
        Ok(DownloadOutcome::Done) => Ok(true),
        Ok(DownloadOutcome::Failed) => Ok(false),
        Ok(DownloadOutcome::Unsupported) => {
            warn!(%url, "unsupported URL scheme");
            Ok(false)
        }
        Err(e) if e.is_out_of_space() => Err(e.into()),
        Err(Error::Io(e)) => {
            warn!(%url, kind = ?e.kind(), error = %e, "download failed");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// String entries of the item's `_fallback` list
fn fallback_urls(kwdict: &Kwdict) -> Vec<String> {
    match kwdict.get("_fallback") {
        Some(Value::Array(urls)) => urls
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(url)) => vec![url.clone()],
        _ => Vec::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

//! # gallery-pipeline
//!
//! Orchestration core for gallery downloaders.
//!
//! Site-specific extractors produce an ordered stream of [`Message`]s. A
//! [`Job`] consumes that stream: it builds target paths from format strings,
//! consults a download archive to avoid duplicates, hands URLs to a
//! downloader, runs post-processor hooks and spawns child jobs for queued
//! URLs. The same job tree can instead list file URLs or metadata, see
//! [`JobKind`].
//!
//! ## Design Philosophy
//!
//! - **Configuration-driven** - paths, filters, archives and hooks come from a layered JSON tree
//! - **Extractor-agnostic** - no site code; anything implementing [`Extractor`] plugs in
//! - **Library-first** - no CLI, no logging subscriber; embed it and observe through `tracing`
//!
//! ## Quick Start
//!
//! ```no_run
//! use gallery_pipeline::{Config, ExtractorRegistry, Job, JobContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("gallery.json".as_ref())?;
//!     let extractors = ExtractorRegistry::new();
//!     // extractors.register("example", "gallery", r"^https://example\.org/g/", factory)?;
//!
//!     let ctx = Arc::new(JobContext::new(config, extractors));
//!     let status = Job::new(ctx, "https://example.org/g/1")?.run().await?;
//!     println!("finished with status {status}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Download archives (SQLite and PostgreSQL)
pub mod archive;
/// Configuration tree and scoped views
pub mod config;
/// Downloaders and the download strategy
pub mod download;
/// Error types
pub mod error;
/// Extractor contract and registry
pub mod extractor;
/// Format string engine
pub mod formatter;
/// Job tree execution
pub mod job;
/// Target path construction
pub mod path;
/// Core types: messages, status bits, hook events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::{Archive, ArchiveOptions, DownloadArchive};
pub use config::{Config, ExtractorConfig};
pub use download::{DownloadStrategy, Downloader, DownloaderRegistry};
pub use error::{ArchiveError, Error, FormatError, Result};
pub use extractor::{CategoryFilter, Extractor, ExtractorFactory, ExtractorInfo, ExtractorRegistry};
pub use formatter::{Formatter, FormatterCache};
pub use job::{
    ControlFlow, Hooks, Job, JobContext, JobError, JobKind, JobOutput, JobResult, PostProcessor,
    PostProcessorRegistry,
};
pub use path::PathFormat;
pub use types::{HookEvent, JobState, JobStatus, Kwdict, Message, Value};

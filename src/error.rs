//! Error types for gallery-pipeline
//!
//! This module provides the error handling for the library:
//! - [`Error`] is the crate-wide error with a [`Result`] alias
//! - [`FormatError`] is raised while *compiling* a format string
//! - [`ArchiveError`] covers download-archive backends
//!
//! Every error maps onto a bit of the job status mask via [`Error::status_bit`],
//! in the same spirit as an API layer mapping errors onto HTTP status codes.

use crate::types::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gallery-pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gallery-pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "archive-mode")
        key: Option<String>,
    },

    /// A format string failed to compile
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Building a filename from its format string failed
    #[error("applying filename format string failed: {0}")]
    FilenameFormat(#[source] FormatError),

    /// Building a directory from its format strings failed
    #[error("applying directory format string failed: {0}")]
    DirectoryFormat(#[source] FormatError),

    /// A filter expression could not be evaluated
    #[error("evaluating filter expression failed: {expression}: {reason}")]
    Filter {
        /// The filter expression
        expression: String,
        /// Why evaluation failed
        reason: String,
    },

    /// Download archive failure
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No extractor is registered for a URL
    #[error("no suitable extractor found for '{0}'")]
    NoExtractor(String),

    /// Extractor produced a message version this pipeline does not speak
    #[error("unsupported message version {version} ({category})")]
    UnsupportedVersion {
        /// Version announced by the extractor
        version: u32,
        /// Category of the extractor
        category: String,
    },

    /// Requested resource does not exist (HTTP 404 and friends)
    #[error("requested resource not found: {0}")]
    NotFound(String),

    /// Extractor-side failure
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A job asked for the whole process to exit
    #[error("exit requested with code {0}")]
    Exit(i32),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while compiling a format string
#[derive(Debug, Error)]
pub enum FormatError {
    /// Malformed template syntax
    #[error("{reason} in format string '{template}'")]
    Syntax {
        /// The offending template
        template: String,
        /// What is wrong with it
        reason: String,
    },

    /// Conversion letter after `!` is not known
    #[error("unknown conversion '!{conversion}' in format string '{template}'")]
    UnknownConversion {
        /// The offending template
        template: String,
        /// The conversion character
        conversion: char,
    },

    /// Expression front-end failed to parse its source
    #[error("invalid expression '{expression}': {reason}")]
    Expression {
        /// The expression source
        expression: String,
        /// Parser message
        reason: String,
    },

    /// Template file could not be read
    #[error("cannot read template file {path}: {source}")]
    TemplateFile {
        /// Path of the template file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// External function front-end names an unregistered function
    #[error("unknown format function '{0}'")]
    UnknownFunction(String),

    /// Condition expression of a conditional format failed at call time
    #[error("evaluating condition '{expression}' failed: {reason}")]
    Condition {
        /// Condition source
        expression: String,
        /// Evaluation message
        reason: String,
    },
}

/// Download archive errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Failed to open the archive store
    #[error("failed to open archive: {0}")]
    ConnectionFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Archive target or option is invalid
    #[error("invalid archive setting: {0}")]
    Invalid(String),
}

impl Error {
    /// Create a configuration error for `key`
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error reports a full disk
    ///
    /// This is the one I/O condition that aborts the whole job tree.
    pub fn is_out_of_space(&self) -> bool {
        match self {
            Error::Io(e) => io_is_out_of_space(e),
            _ => false,
        }
    }

    /// Whether this error only concerns the current item
    pub fn is_item_local(&self) -> bool {
        matches!(
            self,
            Error::Format(_)
                | Error::FilenameFormat(_)
                | Error::DirectoryFormat(_)
                | Error::Filter { .. }
        )
    }

    /// Job status bit contributed by this error
    pub fn status_bit(&self) -> JobStatus {
        match self {
            Error::Format(_) | Error::FilenameFormat(_) | Error::DirectoryFormat(_) => {
                JobStatus::FORMAT_ERROR
            }
            Error::Filter { .. } => JobStatus::FILTER_ERROR,
            Error::NoExtractor(_) => JobStatus::NO_EXTRACTOR,
            Error::NotFound(_) => JobStatus::NOT_FOUND,
            Error::Io(_) => JobStatus::OS_ERROR,
            Error::Network(_) => JobStatus::DOWNLOAD_FAILED,
            Error::Config { .. }
            | Error::Archive(_)
            | Error::Sqlx(_)
            | Error::Serialization(_)
            | Error::UnsupportedVersion { .. }
            | Error::Extraction(_)
            | Error::Exit(_)
            | Error::Other(_) => JobStatus::ERROR,
        }
    }
}

#[cfg(unix)]
fn io_is_out_of_space(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENOSPC)
}

#[cfg(not(unix))]
fn io_is_out_of_space(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::StorageFull
}

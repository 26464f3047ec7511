//! Core types for gallery-pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Item metadata map ("kwdict")
///
/// Insertion order is preserved (`serde_json` is built with `preserve_order`).
pub type Kwdict = serde_json::Map<String, serde_json::Value>;

/// Heterogeneous metadata value stored in a [`Kwdict`]
pub type Value = serde_json::Value;

/// One unit of extractor output
///
/// Extractors yield these in strict order; the job never reorders them.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// New directory context for the following files
    Directory(Kwdict),
    /// A downloadable resource
    Url(String, Kwdict),
    /// A URL to be handled by another extractor in a child job
    Queue(String, Kwdict),
    /// A resource with alternative URLs; the first one is primary
    Urllist(Vec<String>, Kwdict),
    /// Message protocol version announcement
    Version(u32),
}

impl Message {
    /// Short lowercase name of the message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Directory(_) => "directory",
            Message::Url(..) => "url",
            Message::Queue(..) => "queue",
            Message::Urllist(..) => "urllist",
            Message::Version(_) => "version",
        }
    }
}

bitflags::bitflags! {
    /// Accumulated outcome of a job
    ///
    /// Bits are OR-ed in and never cleared; the final process status is
    /// the union of every job in the tree.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct JobStatus: u32 {
        /// Unspecified error
        const ERROR = 1;
        /// Extraction aborted by an `Abort` signal
        const ABORTED = 1 << 1;
        /// A file could not be downloaded from any of its URLs
        const DOWNLOAD_FAILED = 1 << 2;
        /// Requested resource not found
        const NOT_FOUND = 1 << 3;
        /// Format string could not be applied
        const FORMAT_ERROR = 1 << 4;
        /// Filter expression failed
        const FILTER_ERROR = 1 << 5;
        /// No extractor for a queued URL
        const NO_EXTRACTOR = 1 << 6;
        /// Operating system / I/O error
        const OS_ERROR = 1 << 7;
    }
}

impl JobStatus {
    /// Bits after which a failed child may still be recovered through fallback URLs
    pub const FALLBACK_ELIGIBLE: JobStatus = JobStatus::ERROR
        .union(JobStatus::ABORTED)
        .union(JobStatus::DOWNLOAD_FAILED)
        .union(JobStatus::NOT_FOUND)
        .union(JobStatus::FORMAT_ERROR)
        .union(JobStatus::NO_EXTRACTOR);
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Lifecycle state of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Built, extractor not yet initialized
    Constructed,
    /// Extractor initialization in progress
    Initializing,
    /// Consuming messages
    Running,
    /// Running finalize hooks and closing resources
    Finalizing,
    /// Finished; status is final
    Done,
}

/// Named extension point that post-processors attach callbacks to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookEvent {
    /// Before any existence/archive check of a file
    Prepare,
    /// After existence checks, right before downloading
    PrepareAfter,
    /// After a successful download, before the file is moved into place
    File,
    /// After the file is in place
    After,
    /// A file was skipped
    Skip,
    /// A file could not be downloaded
    Error,
    /// A new directory context started
    Post,
    /// A directory context ended
    PostAfter,
    /// Job finished
    Finalize,
    /// Job finished with a clean status
    FinalizeSuccess,
    /// Job finished with errors
    FinalizeError,
    /// Path format created
    Init,
}

impl HookEvent {
    /// All events, in declaration order
    pub const ALL: [HookEvent; 12] = [
        HookEvent::Prepare,
        HookEvent::PrepareAfter,
        HookEvent::File,
        HookEvent::After,
        HookEvent::Skip,
        HookEvent::Error,
        HookEvent::Post,
        HookEvent::PostAfter,
        HookEvent::Finalize,
        HookEvent::FinalizeSuccess,
        HookEvent::FinalizeError,
        HookEvent::Init,
    ];

    /// Configuration name of the event (e.g. `"prepare-after"`)
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Prepare => "prepare",
            HookEvent::PrepareAfter => "prepare-after",
            HookEvent::File => "file",
            HookEvent::After => "after",
            HookEvent::Skip => "skip",
            HookEvent::Error => "error",
            HookEvent::Post => "post",
            HookEvent::PostAfter => "post-after",
            HookEvent::Finalize => "finalize",
            HookEvent::FinalizeSuccess => "finalize-success",
            HookEvent::FinalizeError => "finalize-error",
            HookEvent::Init => "init",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| format!("unknown hook event '{s}'"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_event_names_round_trip() {
        for event in HookEvent::ALL {
            assert_eq!(event.as_str().parse::<HookEvent>().unwrap(), event);
        }
        assert!("pre".parse::<HookEvent>().is_err());
    }

    #[test]
    fn status_bits_accumulate() {
        let mut status = JobStatus::empty();
        status |= JobStatus::DOWNLOAD_FAILED;
        status |= JobStatus::FORMAT_ERROR;
        assert_eq!(status.bits(), 20);
        assert_eq!(status.to_string(), "20");
    }

    #[test]
    fn fallback_eligible_bits() {
        assert_eq!(JobStatus::FALLBACK_ELIGIBLE.bits(), 95);
        assert!(!JobStatus::FALLBACK_ELIGIBLE.contains(JobStatus::FILTER_ERROR));
        assert!(!JobStatus::FALLBACK_ELIGIBLE.contains(JobStatus::OS_ERROR));
    }

    #[test]
    fn message_kind() {
        assert_eq!(Message::Version(1).kind(), "version");
        assert_eq!(
            Message::Urllist(vec![], Kwdict::new()).kind(),
            "urllist"
        );
    }
}

//! Control-flow signals that unwind job frames

use crate::error::Error;
use thiserror::Error;

/// How the job tree proceeds after a message was handled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFlow {
    /// Carry on with the next message
    Continue,
    /// End the current job and `depth - 1` of its ancestors
    StopLocal {
        /// Number of job frames to end, at least 1
        depth: u32,
    },
    /// End every job in the tree
    Terminate,
    /// Run the current job again from the start
    Restart,
    /// Log, mark the job as aborted and continue with the next message
    Abort(String),
    /// End every job and ask the caller to exit with this code
    Exit(i32),
}

impl ControlFlow {
    /// Stop only the current job
    pub fn stop() -> Self {
        ControlFlow::StopLocal { depth: 1 }
    }
}

/// Error type of the job layer: either a control-flow signal or a real error
#[derive(Debug, Error)]
pub enum JobError {
    /// Unwinding requested by an extractor, predicate or skip breaker
    #[error("control flow signal {0:?}")]
    Signal(ControlFlow),
    /// An actual failure
    #[error(transparent)]
    Error(#[from] Error),
}

impl From<ControlFlow> for JobError {
    fn from(signal: ControlFlow) -> Self {
        JobError::Signal(signal)
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Error(Error::Io(e))
    }
}

impl From<crate::error::FormatError> for JobError {
    fn from(e: crate::error::FormatError) -> Self {
        JobError::Error(Error::Format(e))
    }
}

/// Result type of the job layer
pub type JobResult<T> = std::result::Result<T, JobError>;

/// What a finished frame asks of its ancestors
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Unwind {
    /// Nothing; the parent carries on
    None,
    /// End this many further ancestors
    Frames(u32),
    /// End the whole tree
    All,
    /// End the whole tree and report an exit request
    Exit(i32),
}

impl Unwind {
    /// Unwinding left for the parent after one more frame ended
    pub(crate) fn propagate(self) -> Self {
        match self {
            Unwind::Frames(n) if n > 1 => Unwind::Frames(n - 1),
            Unwind::Frames(_) => Unwind::None,
            other => other,
        }
    }

    /// Whether the parent must end too
    pub(crate) fn ends_parent(&self) -> bool {
        !matches!(self, Unwind::None)
    }
}

//! Error types shared by every primitive of the loop.
//!
//! A single [`Error`] enum travels through futures, cancellations and
//! pipelines. It is `Clone` because one failure is routinely delivered to
//! several subscribers (every awaiter of a [`Future`](crate::Future), every
//! later `next()` on a failed [`Pipeline`](crate::Pipeline)).
//!
//! Programmer misuse (completing a future twice, emitting into a completed
//! pipeline) is not represented here: those paths panic.

use crate::driver::WatcherId;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Errors produced by the event loop and the primitives built on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The identifier does not name a live watcher.
    #[error("invalid watcher identifier: {0}")]
    InvalidWatcher(WatcherId),

    /// A cancellation was requested.
    #[error(transparent)]
    Cancelled(#[from] CancelledError),

    /// A timeout cancellation fired.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The pipeline consumer was disposed before the value was retrieved.
    #[error("pipeline consumer disposed")]
    Disposed,

    /// Every source handle of a pipeline was dropped without completing it.
    #[error("pipeline source dropped without completing")]
    SourceDropped,

    /// Several futures failed and the combinator could not be satisfied.
    #[error(transparent)]
    Composite(#[from] CompositeError),

    /// A combinator received fewer futures than it needs.
    #[error("expected at least {required} futures, got {available}")]
    TooFewFutures { required: usize, available: usize },

    /// The loop ran out of work before the awaited future resolved.
    #[error("event loop stopped before the future resolved")]
    Unresolved,

    /// A future failed and nothing ever observed the failure.
    #[error("unhandled future error: {0}")]
    Unhandled(Box<Error>),

    /// An operating system call failed.
    #[error(transparent)]
    Io(Arc<io::Error>),

    /// Any other failure of an asynchronous operation.
    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary error as an operation failure.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Arc::new(error))
    }

    /// Creates an operation failure carrying only a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Other(Arc::new(Message(message.to_string())))
    }

    /// Returns `true` for failures that mean "stopped waiting", not "broke".
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Disposed)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Raised when an operation observes a requested cancellation.
///
/// The triggering cause, if the canceller supplied one, is kept as the
/// [`source`](std::error::Error::source) so a timeout stays diagnosable.
#[derive(Debug, Clone, Default)]
pub struct CancelledError {
    reason: Option<Box<Error>>,
}

impl CancelledError {
    pub fn new(reason: Option<Error>) -> Self {
        Self {
            reason: reason.map(Box::new),
        }
    }

    /// The error that caused the cancellation.
    pub fn reason(&self) -> Option<&Error> {
        self.reason.as_deref()
    }
}

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "operation cancelled: {reason}"),
            None => f.write_str("operation cancelled"),
        }
    }
}

impl std::error::Error for CancelledError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.reason
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Failures collected by [`some`](crate::future::some) when too many of its
/// futures failed. Errors are kept with the index of the future that raised
/// them, in completion order.
#[derive(Debug, Clone)]
pub struct CompositeError {
    errors: Vec<(usize, Error)>,
}

impl CompositeError {
    pub(crate) fn new(errors: Vec<(usize, Error)>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[(usize, Error)] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<(usize, Error)> {
        self.errors
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} futures failed", self.errors.len())?;

        for (key, error) in &self.errors {
            write!(f, "; [{key}] {error}")?;
        }

        Ok(())
    }
}

impl std::error::Error for CompositeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|(_, e)| e as &(dyn std::error::Error + 'static))
    }
}

//! Error types for the affinity runtime.
//!
//! Every failure in this crate surfaces through a future's completed-with-error
//! channel as an [`Error`]. Nothing here logs, retries, or swallows errors; that
//! is left to the filters consuming the futures.
//!
//! # Error Categories
//!
//! - **Cancellation**: the future was cancelled before it produced a value
//! - **Continuation**: a user-supplied continuation body panicked
//! - **Worker**: the owning worker refused a task (it has shut down)
//! - **Completion**: a future was completed twice
//! - **Config**: invalid event loop configuration
//! - **Internal**: runtime bugs and invalid states
//! - **User**: errors produced by application code

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The future was cancelled.
    Cancelled,
    /// A continuation body panicked while running.
    ContinuationPanicked,
    /// The owning worker has shut down and rejected a task.
    WorkerShutdown,
    /// A future was completed after it had already settled.
    AlreadyCompleted,
    /// Invalid configuration.
    Config,
    /// Internal runtime error (bug).
    Internal,
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::ContinuationPanicked => ErrorCategory::Continuation,
            Self::WorkerShutdown => ErrorCategory::Worker,
            Self::AlreadyCompleted => ErrorCategory::Completion,
            Self::Config => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }

    /// Short, stable name used in `Display` output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::ContinuationPanicked => "continuation panicked",
            Self::WorkerShutdown => "worker shut down",
            Self::AlreadyCompleted => "already completed",
            Self::Config => "invalid configuration",
            Self::Internal => "internal error",
            Self::User => "user error",
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation-related failures.
    Cancellation,
    /// Failures raised by continuation bodies.
    Continuation,
    /// Owning worker failures.
    Worker,
    /// Completion protocol violations.
    Completion,
    /// Configuration failures.
    Config,
    /// Internal runtime errors.
    Internal,
    /// User-originated errors.
    User,
}

/// The main error type for affinity runtime operations.
///
/// Cloning is cheap: the source chain is reference counted, so a single
/// failed outcome can be handed to every dependent continuation.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Creates a user error carrying `msg`.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Creates the error a future settles with when it is cancelled.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates the error used when a worker refuses a task.
    #[must_use]
    pub const fn worker_shutdown() -> Self {
        Self::new(ErrorKind::WorkerShutdown)
    }

    /// Converts a caught panic payload into a continuation error.
    #[must_use]
    pub fn from_panic(payload: &Box<dyn Any + Send>) -> Self {
        Self::new(ErrorKind::ContinuationPanicked).with_message(panic_message(payload))
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if a continuation body panicked.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self.kind, ErrorKind::ContinuationPanicked)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if both errors share the same kind, message and source
    /// allocation. Used to check that an outcome was forwarded untouched.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        let same_source = match (&self.source, &other.source) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.kind == other.kind && self.message == other.message && same_source
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// A specialized Result type for affinity runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Returned by a completion attempt on a future that has already settled.
///
/// Carries the rejected input back to the caller. The settled outcome is left
/// untouched.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AlreadyCompleted<T>(pub T);

impl<T> AlreadyCompleted<T> {
    /// Returns the input that was rejected.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for AlreadyCompleted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AlreadyCompleted(..)")
    }
}

impl<T> fmt::Display for AlreadyCompleted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "future already completed")
    }
}

impl<T> std::error::Error for AlreadyCompleted<T> {}

impl<T> From<AlreadyCompleted<T>> for Error {
    fn from(_: AlreadyCompleted<T>) -> Self {
        Self::new(ErrorKind::AlreadyCompleted)
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

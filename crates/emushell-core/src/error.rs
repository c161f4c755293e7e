//! Error types for emushell core.

use std::fmt;

/// Outcome of a method executed on the main thread.
pub type MethodResult = std::result::Result<(), MethodError>;

/// A specialized Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced by the main-thread RPC dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The dispatch queue is closed (shutdown in progress or complete).
    ///
    /// No dispatch occurred. Unlike the main-thread short-circuit, the
    /// submitted method will never run.
    #[error("dispatch queue is unavailable (shutdown in progress)")]
    DispatchUnavailable,

    /// The method ran on the main thread and reported an error.
    #[error("method failed on the main thread: {0}")]
    MethodFailed(#[source] MethodError),

    /// A bounded blocking wait elapsed before the method completed.
    ///
    /// The call stays queued and will still execute exactly once.
    #[error("timed out waiting for the main thread to complete the call")]
    TimedOut,

    /// The call was dropped before it could complete.
    ///
    /// Happens when the queue is torn down with the call still pending. A
    /// method that panics reports [`MethodFailed`](Self::MethodFailed) instead.
    #[error("call was abandoned before completion")]
    Abandoned,
}

impl RpcError {
    /// Returns `true` if the submitted method is known to have run.
    pub fn method_ran(&self) -> bool {
        matches!(self, Self::MethodFailed(_))
    }
}

/// An error reported by a method executing on the main thread.
///
/// This is the result value attached to a completion signal, carried back
/// to a blocking caller or to the failed-call report channel.
pub struct MethodError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl MethodError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, using its display text as the message.
    pub fn from_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap an underlying error with additional context.
    pub fn with_context<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build an error from the payload of a caught panic.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail: &str = if let Some(s) = payload.downcast_ref::<&'static str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "non-string panic payload"
        };
        Self::new(format!("method panicked: {detail}"))
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodError")
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for MethodError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Detected when a pending-save clear is not matched by an earlier start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pending saves count mismatch (pending count is less than 0)")]
pub struct CounterUnderflow;

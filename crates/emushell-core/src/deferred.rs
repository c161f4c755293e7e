//! Deferred calls: units of work queued for the main thread.
//!
//! A deferred call wraps a zero-argument operation on the application
//! context together with an optional completion handle. The queue owns the
//! call until the main thread executes it; execution consumes the call, so
//! it runs at most once.
//!
//! A panic inside the method is caught and turned into a [`MethodError`], so
//! it reaches the caller like any other failure and the loop keeps running.
//! A [`CounterUnderflow`] panic is a bookkeeping bug and is re-raised.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use crate::completion::CompletionHandle;
use crate::error::{CounterUnderflow, MethodError, MethodResult};
use crate::logging::targets;

/// A unique identifier for a deferred call.
///
/// Identifiers are assigned by the dispatch queue under its lock, so their
/// order is the order in which the queue accepted the calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(u64);

impl CallId {
    pub(crate) fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    /// Get the raw u64 value of this call ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A boxed method bound to the application context.
pub type BoxedMethod<A> = Box<dyn FnOnce(&A) -> MethodResult + Send + 'static>;

/// A method call waiting to run on the main thread.
pub struct DeferredCall<A> {
    id: Option<CallId>,
    label: &'static str,
    method: BoxedMethod<A>,
    completion: Option<CompletionHandle>,
}

impl<A> DeferredCall<A> {
    /// Create a fire-and-forget call.
    pub fn new<F>(label: &'static str, method: F) -> Self
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        Self {
            id: None,
            label,
            method: Box::new(method),
            completion: None,
        }
    }

    /// Create a call whose completion is reported through `completion`.
    pub fn with_completion<F>(label: &'static str, method: F, completion: CompletionHandle) -> Self
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        Self {
            id: None,
            label,
            method: Box::new(method),
            completion: Some(completion),
        }
    }

    /// The call's position in the dispatch queue, once enqueued.
    pub fn id(&self) -> Option<CallId> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: CallId) {
        self.id = Some(id);
    }

    /// The label used in logs and failure reports.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Whether a caller is blocked waiting for this call.
    pub fn is_blocking(&self) -> bool {
        self.completion.is_some()
    }

    /// Run the method against `context`.
    ///
    /// For a blocking call the result is handed to the waiting caller and
    /// `None` is returned. For a fire-and-forget call the result is returned
    /// so the loop can report a failure.
    ///
    /// # Panics
    ///
    /// Re-raises a panic whose payload is [`CounterUnderflow`]. Any other
    /// panic in the method is returned as a [`MethodError`].
    pub fn execute(self, context: &A) -> Option<MethodResult> {
        let method = self.method;
        let result = match catch_unwind(AssertUnwindSafe(|| method(context))) {
            Ok(result) => result,
            Err(payload) if payload.is::<CounterUnderflow>() => resume_unwind(payload),
            Err(payload) => {
                let error = MethodError::from_panic(payload.as_ref());
                tracing::error!(
                    target: targets::DISPATCH,
                    call = ?self.id,
                    label = self.label,
                    "{error}"
                );
                Err(error)
            }
        };
        match self.completion {
            Some(completion) => {
                completion.complete(result);
                None
            }
            None => Some(result),
        }
    }
}

impl<A> fmt::Debug for DeferredCall<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCall")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("blocking", &self.is_blocking())
            .finish_non_exhaustive()
    }
}

//! Completion signals for blocking deferred calls.
//!
//! A blocking caller creates a [`completion_pair`], attaches the
//! [`CompletionHandle`] to the deferred call and parks on the
//! [`CompletionWaiter`]. The main thread signals the handle with the method's
//! result right after the method returns.
//!
//! A signal moves from pending to signaled exactly once. A handle that is
//! dropped without being signaled (the queue was torn down) releases the
//! waiter with [`RpcError::Abandoned`], so a blocked
//! caller never waits on a call that can no longer run.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{MethodResult, RpcError};
use crate::logging::targets;

/// Shared state between a handle and its waiter.
struct CompletionState {
    /// `None` while pending; the outcome once signaled.
    outcome: Mutex<Option<Outcome>>,
    condvar: Condvar,
}

/// Final state of a signaled completion.
enum Outcome {
    /// The method ran and returned this result.
    Completed(MethodResult),
    /// The call was dropped without running to completion.
    Abandoned,
}

impl CompletionState {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Transition pending → signaled. Later calls are ignored.
    fn signal(&self, outcome: Outcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.condvar.notify_all();
        true
    }

    fn is_signaled(&self) -> bool {
        self.outcome.lock().is_some()
    }
}

fn into_result(outcome: Outcome) -> crate::error::Result<()> {
    match outcome {
        Outcome::Completed(Ok(())) => Ok(()),
        Outcome::Completed(Err(err)) => Err(RpcError::MethodFailed(err)),
        Outcome::Abandoned => Err(RpcError::Abandoned),
    }
}

/// The signaling side of a completion, carried by a deferred call.
pub struct CompletionHandle {
    inner: Option<Arc<CompletionState>>,
}

impl CompletionHandle {
    /// Signal that the invocation finished with `result`.
    pub fn complete(mut self, result: MethodResult) {
        if let Some(inner) = self.inner.take() {
            inner.signal(Outcome::Completed(result));
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if inner.signal(Outcome::Abandoned) {
                tracing::debug!(
                    target: targets::DISPATCH,
                    "blocking call dropped before completion; releasing waiter"
                );
            }
        }
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("armed", &self.inner.is_some())
            .finish()
    }
}

/// The waiting side of a completion.
pub struct CompletionWaiter {
    inner: Arc<CompletionState>,
}

impl CompletionWaiter {
    /// Block until the handle is signaled, then return the method's result.
    ///
    /// # Warning
    ///
    /// Waiting on the main thread for a call that the main thread itself has
    /// to execute deadlocks. The dispatcher never does this: calls made on
    /// the main thread short-circuit instead of queueing.
    pub fn wait(self) -> crate::error::Result<()> {
        let mut slot = self.inner.outcome.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return into_result(outcome);
            }
            self.inner.condvar.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`.
    ///
    /// Returns `Err(RpcError::TimedOut)` if the handle was not signaled in
    /// time.
    pub fn wait_timeout(self, timeout: Duration) -> crate::error::Result<()> {
        let mut slot = self.inner.outcome.lock();
        if slot.is_none() {
            // wait_while_for handles spurious wakeups and keeps the deadline.
            self.inner
                .condvar
                .wait_while_for(&mut slot, |outcome| outcome.is_none(), timeout);
        }
        match slot.take() {
            Some(outcome) => into_result(outcome),
            None => Err(RpcError::TimedOut),
        }
    }

    /// Check whether the handle has been signaled, without blocking.
    pub fn is_signaled(&self) -> bool {
        self.inner.is_signaled()
    }
}

/// Create a completion handle/waiter pair for one blocking invocation.
pub fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    let state = Arc::new(CompletionState::new());

    (
        CompletionHandle {
            inner: Some(state.clone()),
        },
        CompletionWaiter { inner: state },
    )
}

/// A reusable completion signal.
///
/// Owned by a caller that issues a series of blocking calls one after
/// another. Each [`arm`](Self::arm) hands out a handle for one in-flight
/// call; after the result is consumed by [`wait`](Self::wait) the signal is
/// pending again and can be armed for the next call.
pub struct CompletionSignal {
    inner: Arc<CompletionState>,
}

impl CompletionSignal {
    /// Create a signal in the pending state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CompletionState::new()),
        }
    }

    /// Get a handle for one in-flight call.
    ///
    /// Returns `None` while a previous handle is still outstanding or a
    /// result has not been consumed yet; a signal serves at most one call at
    /// a time.
    pub fn arm(&mut self) -> Option<CompletionHandle> {
        if Arc::strong_count(&self.inner) > 1 || self.inner.is_signaled() {
            return None;
        }
        Some(CompletionHandle {
            inner: Some(self.inner.clone()),
        })
    }

    /// Block until signaled, consuming the result and resetting to pending.
    ///
    /// Returns `Err(RpcError::Abandoned)` at once if no handle is armed and
    /// no result is waiting, since nothing could ever signal it.
    pub fn wait(&mut self) -> crate::error::Result<()> {
        self.check_armed()?;
        CompletionWaiter {
            inner: self.inner.clone(),
        }
        .wait()
    }

    /// Block for at most `timeout`; on success the signal resets to pending.
    ///
    /// Unarmed and empty, it returns `Err(RpcError::Abandoned)` without waiting.
    pub fn wait_timeout(&mut self, timeout: Duration) -> crate::error::Result<()> {
        self.check_armed()?;
        CompletionWaiter {
            inner: self.inner.clone(),
        }
        .wait_timeout(timeout)
    }

    /// Check whether the signal is in the signaled state.
    pub fn is_signaled(&self) -> bool {
        self.inner.is_signaled()
    }

    // `&mut self` rules out a concurrent `arm`, so a count of one is final.
    fn check_armed(&self) -> crate::error::Result<()> {
        let slot = self.inner.outcome.lock();
        if slot.is_none() && Arc::strong_count(&self.inner) == 1 {
            return Err(RpcError::Abandoned);
        }
        Ok(())
    }

    /// Discard any unconsumed result and return to the pending state.
    ///
    /// Has no effect on a handle that is still outstanding: if that handle
    /// signals later, the signal becomes signaled again.
    pub fn reset(&mut self) {
        self.inner.outcome.lock().take();
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CompletionHandle: Send);
static_assertions::assert_impl_all!(CompletionWaiter: Send, Sync);

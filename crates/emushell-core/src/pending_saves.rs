//! Pending-save tracking gated through the main thread.
//!
//! Any save that must finish before the application exits is bracketed by
//! [`Dispatcher::start_pending_save`] and [`Dispatcher::clear_pending_save`].
//! Both may be called from any thread: off the main thread they route
//! themselves through [`Dispatcher::try_invoke_async`], so the counter is
//! only ever modified on the main thread and needs no lock.
//!
//! A clear without a matching start is a programming error. Debug builds
//! panic; release builds log a warning and leave the counter at zero.

use crate::dispatcher::Dispatcher;
use crate::error::{CounterUnderflow, Result};
use crate::logging::targets;
use crate::thread_check::{MainThreadCell, ThreadAffinity};

/// Count of saves in progress. Main-thread only.
#[derive(Debug)]
pub struct PendingSaveCounter {
    count: MainThreadCell<i64>,
}

impl PendingSaveCounter {
    /// Create a counter owned by the current thread.
    ///
    /// Construct it on the thread that will run the main loop.
    pub fn new() -> Self {
        Self::with_affinity(ThreadAffinity::current())
    }

    /// Create a counter owned by the thread recorded in `affinity`.
    pub fn with_affinity(affinity: ThreadAffinity) -> Self {
        Self {
            count: MainThreadCell::with_affinity(0, affinity),
        }
    }

    /// Add one pending save, returning the new count.
    pub fn increment(&self) -> i64 {
        self.count.update(|n| n + 1)
    }

    /// Remove one pending save, returning the new count.
    ///
    /// The counter never goes negative: on underflow it is left untouched.
    pub fn decrement(&self) -> std::result::Result<i64, CounterUnderflow> {
        let current = self.count.get();
        if current <= 0 {
            return Err(CounterUnderflow);
        }
        self.count.set(current - 1);
        Ok(current - 1)
    }

    /// The current count.
    pub fn count(&self) -> i64 {
        self.count.get()
    }

    /// Whether any save is still in progress.
    pub fn has_pending(&self) -> bool {
        self.count() > 0
    }
}

impl Default for PendingSaveCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Application contexts that track pending saves.
pub trait HasPendingSaves {
    /// The context's pending-save counter.
    fn pending_saves(&self) -> &PendingSaveCounter;
}

fn start_on_main(counter: &PendingSaveCounter) {
    let count = counter.increment();
    tracing::trace!(target: targets::PENDING_SAVES, count, "pending save started");
}

fn clear_on_main(counter: &PendingSaveCounter) {
    match counter.decrement() {
        Ok(count) => {
            tracing::trace!(target: targets::PENDING_SAVES, count, "pending save cleared");
        }
        Err(err) => {
            if cfg!(debug_assertions) {
                tracing::error!(target: targets::PENDING_SAVES, "{err}");
                // Typed payload: the loop re-raises it instead of reporting it.
                std::panic::panic_any(err);
            }
            tracing::warn!(target: targets::PENDING_SAVES, "{err}; ignoring unmatched clear");
        }
    }
}

impl<A> Dispatcher<A>
where
    A: HasPendingSaves + Send + Sync + 'static,
{
    /// Record that a save has started and must finish before exit.
    ///
    /// Off the main thread the increment is queued and happens on a later
    /// loop iteration; on the main thread it happens immediately.
    ///
    /// # Errors
    ///
    /// [`RpcError::DispatchUnavailable`](crate::RpcError::DispatchUnavailable)
    /// if the call had to be queued and the queue is closed.
    pub fn start_pending_save(&self) -> Result<()> {
        let invocation = self.try_invoke_async(|app: &A| {
            start_on_main(app.pending_saves());
            Ok(())
        })?;
        if !invocation.is_dispatched() {
            start_on_main(self.context().pending_saves());
        }
        Ok(())
    }

    /// Record that a save started with [`start_pending_save`](Self::start_pending_save)
    /// has finished.
    ///
    /// # Panics
    ///
    /// In debug builds, panics on the main thread with a [`CounterUnderflow`]
    /// payload if no save is pending. The panic is not caught by the loop.
    ///
    /// # Errors
    ///
    /// [`RpcError::DispatchUnavailable`](crate::RpcError::DispatchUnavailable)
    /// if the call had to be queued and the queue is closed.
    pub fn clear_pending_save(&self) -> Result<()> {
        let invocation = self.try_invoke_async(|app: &A| {
            clear_on_main(app.pending_saves());
            Ok(())
        })?;
        if !invocation.is_dispatched() {
            clear_on_main(self.context().pending_saves());
        }
        Ok(())
    }

    /// Whether any save is still in progress.
    ///
    /// # Panics
    ///
    /// Panics if called off the main thread.
    pub fn has_pending_saves(&self) -> bool {
        self.main_thread()
            .assert_same_thread_with_msg("has_pending_saves must be called on the main thread");
        self.context().pending_saves().has_pending()
    }
}

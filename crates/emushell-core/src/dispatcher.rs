//! Main-thread RPC dispatcher.
//!
//! A [`Dispatcher`] lets any thread request that a method run on the main
//! thread against the application context. It is a cheap, cloneable handle
//! obtained from [`MainLoop::dispatcher`](crate::MainLoop::dispatcher).
//!
//! # Calling Conventions
//!
//! | Operation | On the main thread | On any other thread |
//! |-----------|--------------------|---------------------|
//! | [`try_invoke_blocking`](Dispatcher::try_invoke_blocking) | `NotDispatched`, caller runs the method | queued, caller waits for completion |
//! | [`try_invoke_async`](Dispatcher::try_invoke_async) | `NotDispatched`, caller runs the method | queued, caller continues |
//! | [`post_method`](Dispatcher::post_method) | queued | queued |
//! | [`process_method`](Dispatcher::process_method) | runs inline | queued, caller waits for completion |
//!
//! The `try_` operations follow a setjmp-like convention: the return value
//! tells the caller whether the dispatcher took the call or whether the
//! caller, already on the main thread, must perform it itself.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use emushell_core::{MainLoop, Invocation};
//!
//! let main_loop = MainLoop::new(Arc::new(AtomicU32::new(0)));
//! let dispatcher = main_loop.dispatcher();
//!
//! let worker = std::thread::spawn(move || {
//!     dispatcher
//!         .try_invoke_async(|counter: &AtomicU32| {
//!             counter.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         })
//!         .unwrap()
//! });
//! assert!(worker.join().unwrap().is_dispatched());
//!
//! let mut main_loop = main_loop;
//! main_loop.process_until_idle();
//! assert_eq!(main_loop.context().load(Ordering::SeqCst), 1);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::completion::completion_pair;
use crate::config::DispatcherConfig;
use crate::deferred::{CallId, DeferredCall};
use crate::error::{MethodError, MethodResult, Result, RpcError};
use crate::event::{AppEvent, UserEvent};
use crate::logging::targets;
use crate::queue::DispatchQueue;
use crate::thread_check::ThreadAffinity;

/// Whether a `try_` operation handed the call to the dispatch queue.
#[must_use = "on `NotDispatched` the caller must perform the call itself"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// The caller is on the main thread; nothing was queued.
    NotDispatched,
    /// The call was queued with this ID.
    Dispatched(CallId),
}

impl Invocation {
    /// Returns `true` if the call was queued.
    pub fn is_dispatched(self) -> bool {
        matches!(self, Self::Dispatched(_))
    }

    /// The queued call's ID, if any.
    pub fn call_id(self) -> Option<CallId> {
        match self {
            Self::Dispatched(id) => Some(id),
            Self::NotDispatched => None,
        }
    }
}

/// A fire-and-forget call that failed on the main thread.
///
/// No caller is waiting for these, so they are delivered through
/// [`Dispatcher::failed_calls`] and logged.
#[derive(Debug)]
pub struct FailedCall {
    /// Queue position of the failed call.
    pub id: Option<CallId>,
    /// Label of the failed call.
    pub label: &'static str,
    /// The error the method returned.
    pub error: MethodError,
}

/// State shared between the main loop and all dispatcher handles.
pub(crate) struct Shared<A> {
    pub(crate) context: Arc<A>,
    pub(crate) queue: DispatchQueue<A>,
    pub(crate) main_thread: ThreadAffinity,
    pub(crate) config: DispatcherConfig,
    failures_tx: Sender<FailedCall>,
    failures_rx: Receiver<FailedCall>,
}

impl<A> Shared<A> {
    pub(crate) fn new(context: Arc<A>, config: DispatcherConfig) -> Self {
        let (failures_tx, failures_rx) = bounded(config.failure_capacity);
        Self {
            context,
            queue: DispatchQueue::new(),
            main_thread: ThreadAffinity::current(),
            config,
            failures_tx,
            failures_rx,
        }
    }

    /// Deliver a failed fire-and-forget call to the report channel.
    pub(crate) fn report_failure(&self, failure: FailedCall) {
        tracing::error!(
            target: targets::DISPATCH,
            event_loop = %self.config.name,
            call = ?failure.id,
            label = failure.label,
            error = %failure.error,
            "deferred call failed with no caller waiting"
        );
        match self.failures_tx.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    target: targets::DISPATCH,
                    call = ?dropped.id,
                    "failed-call channel is full; dropping report"
                );
            }
            // The shared state owns a receiver, so the channel never disconnects.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Handle for submitting calls to the main thread.
///
/// Cloneable, `Send` and `Sync` whenever the context is. All clones feed the
/// same FIFO queue.
pub struct Dispatcher<A> {
    pub(crate) shared: Arc<Shared<A>>,
}

impl<A> Clone for Dispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A: Send + Sync + 'static> Dispatcher<A> {
    /// The application context methods are invoked on.
    pub fn context(&self) -> &Arc<A> {
        &self.shared.context
    }

    /// The affinity of the designated main thread.
    pub fn main_thread(&self) -> ThreadAffinity {
        self.shared.main_thread
    }

    /// Check whether the calling thread is the main thread.
    #[inline]
    pub fn is_main_thread(&self) -> bool {
        self.shared.main_thread.is_same_thread()
    }

    /// The configuration of the owning main loop.
    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Run `method` on the main thread and wait for it to finish.
    ///
    /// On the main thread this returns `Ok(NotDispatched)` without queueing
    /// anything; the caller is expected to invoke the method directly.
    /// Elsewhere the call is queued and this thread blocks until the main
    /// thread has completed it, then returns `Ok(Dispatched(id))`.
    ///
    /// The wait is unbounded unless the loop was configured with a
    /// `blocking_timeout`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DispatchUnavailable`] if the queue is closed.
    /// - [`RpcError::MethodFailed`] if the method returned an error.
    /// - [`RpcError::TimedOut`] if a configured wait bound elapsed.
    /// - [`RpcError::Abandoned`] if the call was dropped before completing.
    pub fn try_invoke_blocking<F>(&self, method: F) -> Result<Invocation>
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        self.invoke_blocking(method, self.shared.config.blocking_timeout)
    }

    /// Like [`try_invoke_blocking`](Self::try_invoke_blocking), but waits at
    /// most `timeout`.
    ///
    /// On [`RpcError::TimedOut`] the call remains queued and still executes
    /// exactly once; only the wait is given up.
    pub fn try_invoke_blocking_timeout<F>(&self, method: F, timeout: Duration) -> Result<Invocation>
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        self.invoke_blocking(method, Some(timeout))
    }

    fn invoke_blocking<F>(&self, method: F, timeout: Option<Duration>) -> Result<Invocation>
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        if self.is_main_thread() {
            return Ok(Invocation::NotDispatched);
        }

        let (handle, waiter) = completion_pair();
        let call = DeferredCall::with_completion(std::any::type_name::<F>(), method, handle);
        let id = self.enqueue(call)?;

        let result = match timeout {
            Some(timeout) => waiter.wait_timeout(timeout),
            None => waiter.wait(),
        };
        tracing::trace!(target: targets::DISPATCH, call = %id, ok = result.is_ok(), "blocking call returned");
        result.map(|()| Invocation::Dispatched(id))
    }

    /// Queue `method` for the main thread without waiting.
    ///
    /// On the main thread this returns `Ok(NotDispatched)` without queueing
    /// anything. Elsewhere the call is queued and `Ok(Dispatched(id))` is
    /// returned immediately. Failures of the method are reported through
    /// [`failed_calls`](Self::failed_calls).
    ///
    /// # Errors
    ///
    /// [`RpcError::DispatchUnavailable`] if the queue is closed.
    pub fn try_invoke_async<F>(&self, method: F) -> Result<Invocation>
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        if self.is_main_thread() {
            return Ok(Invocation::NotDispatched);
        }
        let id = self.enqueue(DeferredCall::new(std::any::type_name::<F>(), method))?;
        Ok(Invocation::Dispatched(id))
    }

    /// Queue `method` for the main thread, even when called from it.
    ///
    /// Use this for deferred, reentrancy-safe execution: the method runs on
    /// a later loop iteration, after everything already queued.
    ///
    /// # Errors
    ///
    /// [`RpcError::DispatchUnavailable`] if the queue is closed.
    pub fn post_method<F>(&self, method: F) -> Result<CallId>
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        self.enqueue(DeferredCall::new(std::any::type_name::<F>(), method))
    }

    /// Ensure `method` runs on the main thread and finishes before returning.
    ///
    /// Runs inline when called on the main thread, otherwise dispatches it
    /// as a blocking call. Either way the method's error, if any, is
    /// returned as [`RpcError::MethodFailed`].
    pub fn process_method<F>(&self, method: F) -> Result<()>
    where
        F: FnOnce(&A) -> MethodResult + Send + 'static,
    {
        if self.is_main_thread() {
            return method(&self.shared.context).map_err(RpcError::MethodFailed);
        }
        self.try_invoke_blocking(method).map(|_| ())
    }

    /// Queue an application-defined event for the user event handler.
    pub fn post_user_event(&self, event: UserEvent) -> Result<()> {
        self.shared.queue.push(AppEvent::User(event))
    }

    /// Wake up the main loop without doing any work.
    pub fn wake_up(&self) -> Result<()> {
        self.shared.queue.push(AppEvent::WakeUp)
    }

    /// Ask the main loop to stop.
    ///
    /// Everything queued before the request still runs; the queue closes
    /// when the loop reaches it.
    pub fn quit(&self) -> Result<()> {
        tracing::info!(target: targets::EVENT_LOOP, event_loop = %self.shared.config.name, "quit requested");
        self.shared.queue.push(AppEvent::Quit)
    }

    /// Whether the queue still accepts submissions.
    pub fn is_accepting(&self) -> bool {
        !self.shared.queue.is_closed()
    }

    /// Number of events queued or still being handled.
    ///
    /// Reaches zero only once the last event has fully completed, not when
    /// it is merely dequeued.
    pub fn pending_count(&self) -> usize {
        self.shared.queue.outstanding()
    }

    /// Receiver for failures of fire-and-forget calls.
    ///
    /// All receivers share one channel; each report goes to exactly one.
    pub fn failed_calls(&self) -> Receiver<FailedCall> {
        self.shared.failures_rx.clone()
    }

    fn enqueue(&self, call: DeferredCall<A>) -> Result<CallId> {
        let label = call.label();
        let blocking = call.is_blocking();
        match self.shared.queue.push_call(call) {
            Ok(id) => {
                tracing::trace!(target: targets::DISPATCH, call = %id, label, blocking, "deferred call queued");
                Ok(id)
            }
            Err(err) => {
                tracing::debug!(target: targets::DISPATCH, label, "rejected deferred call: {err}");
                Err(err)
            }
        }
    }
}

impl<A> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("event_loop", &self.shared.config.name)
            .field("main_thread", &self.shared.main_thread.thread_id())
            .field("queued", &self.shared.queue.len())
            .field("closed", &self.shared.queue.is_closed())
            .finish()
    }
}

static_assertions::assert_impl_all!(Dispatcher<()>: Send, Sync, Clone);

//! The main loop and its event processing.

use std::fmt;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DispatcherConfig;
use crate::dispatcher::{Dispatcher, FailedCall, Shared};
use crate::error::{Result, RpcError};
use crate::event::{AppEvent, UserEvent};
use crate::logging::targets;

/// Type alias for the user event handler callback.
pub type UserEventHandler<A> = Box<dyn FnMut(&A, &UserEvent)>;

/// Why a bounded run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A quit request was processed; the queue is closed.
    Quit,
    /// The time budget elapsed with the loop still open.
    TimedOut,
}

/// The main-thread side of the dispatcher.
///
/// The thread that creates a `MainLoop` becomes the main thread for every
/// [`Dispatcher`] it hands out. A `MainLoop` is neither `Send` nor `Sync`,
/// so it stays on that thread.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use emushell_core::MainLoop;
///
/// let mut main_loop = MainLoop::new(Arc::new(()));
/// let dispatcher = main_loop.dispatcher();
///
/// let worker = std::thread::spawn(move || {
///     dispatcher.try_invoke_blocking(|_: &()| Ok(())).unwrap();
///     dispatcher.quit().unwrap();
/// });
///
/// // Runs until the worker's quit request is processed.
/// main_loop.run().unwrap();
/// worker.join().unwrap();
/// ```
pub struct MainLoop<A> {
    shared: Arc<Shared<A>>,
    user_handler: Option<UserEventHandler<A>>,
    /// Pins the loop to the thread that created it.
    _main_thread_only: PhantomData<*const ()>,
}

impl<A: Send + Sync + 'static> MainLoop<A> {
    /// Create a main loop on the current thread with default configuration.
    pub fn new(context: Arc<A>) -> Self {
        Self::with_config(context, DispatcherConfig::default())
    }

    /// Create a main loop on the current thread with a custom configuration.
    pub fn with_config(context: Arc<A>, config: DispatcherConfig) -> Self {
        tracing::debug!(
            target: targets::EVENT_LOOP,
            event_loop = %config.name,
            main_thread = ?std::thread::current().id(),
            "main loop created"
        );
        Self {
            shared: Arc::new(Shared::new(context, config)),
            user_handler: None,
            _main_thread_only: PhantomData,
        }
    }

    /// Get a handle for submitting calls from any thread.
    pub fn dispatcher(&self) -> Dispatcher<A> {
        Dispatcher {
            shared: self.shared.clone(),
        }
    }

    /// The application context.
    pub fn context(&self) -> &Arc<A> {
        &self.shared.context
    }

    /// Set a handler for [`UserEvent`]s.
    pub fn set_user_event_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&A, &UserEvent) + 'static,
    {
        self.user_handler = Some(Box::new(handler));
    }

    /// Clear the user event handler.
    pub fn clear_user_event_handler(&mut self) {
        self.user_handler = None;
    }

    /// Whether the loop has shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Handle up to one batch of queued events without waiting.
    ///
    /// Returns the number of events handled. Events submitted while the
    /// batch runs are eligible for the same batch, up to the batch size.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while handled < self.shared.config.batch_size {
            let Some(event) = self.shared.queue.pop() else {
                break;
            };
            handled += 1;
            if self.handle_event(event).is_break() {
                break;
            }
        }
        handled
    }

    /// Handle queued events until the queue is empty or the loop quits.
    ///
    /// Returns the number of events handled.
    pub fn process_until_idle(&mut self) -> usize {
        let mut total = 0;
        loop {
            let handled = self.process_pending();
            total += handled;
            if handled == 0 || self.is_closed() {
                return total;
            }
        }
    }

    /// Run the loop until a quit request is processed.
    ///
    /// Blocks the main thread while the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DispatchUnavailable`] if the loop has already
    /// shut down.
    #[tracing::instrument(skip(self), target = "emushell_core::event_loop", level = "debug", fields(event_loop = %self.shared.config.name))]
    pub fn run(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::DispatchUnavailable);
        }
        tracing::info!(target: targets::EVENT_LOOP, "starting main loop");

        while let Some(event) = self.shared.queue.wait_pop(None) {
            if self.handle_event(event).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Run the loop for at most `budget`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DispatchUnavailable`] if the loop has already
    /// shut down.
    pub fn run_for(&mut self, budget: Duration) -> Result<LoopExit> {
        if self.is_closed() {
            return Err(RpcError::DispatchUnavailable);
        }

        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(LoopExit::TimedOut);
            }
            match self.shared.queue.wait_pop(Some(remaining)) {
                Some(event) => {
                    if self.handle_event(event).is_break() {
                        return Ok(LoopExit::Quit);
                    }
                }
                None if self.is_closed() => return Ok(LoopExit::Quit),
                None => return Ok(LoopExit::TimedOut),
            }
        }
    }

    /// Close the dispatch queue.
    ///
    /// Calls still queued are dropped without running; their blocking
    /// callers are released with [`RpcError::Abandoned`]. Later submissions
    /// fail with [`RpcError::DispatchUnavailable`]. Returns the number of
    /// dropped calls.
    pub fn shutdown(&mut self) -> usize {
        let leftover = self.shared.queue.close();
        let mut dropped = 0;
        for event in leftover {
            if let AppEvent::Invoke(call) = event {
                tracing::debug!(
                    target: targets::EVENT_LOOP,
                    call = ?call.id(),
                    label = call.label(),
                    blocking = call.is_blocking(),
                    "dropping deferred call at shutdown"
                );
                dropped += 1;
            }
        }
        tracing::info!(
            target: targets::EVENT_LOOP,
            event_loop = %self.shared.config.name,
            dropped,
            "main loop shut down"
        );
        dropped
    }

    fn handle_event(&mut self, event: AppEvent<A>) -> ControlFlow<()> {
        let done = EventDone(self.shared.clone());
        let flow = match event {
            AppEvent::Invoke(call) => {
                let id = call.id();
                let label = call.label();
                tracing::trace!(
                    target: targets::DISPATCH,
                    call = ?id,
                    label,
                    blocking = call.is_blocking(),
                    "executing deferred call"
                );
                if let Some(Err(error)) = call.execute(&self.shared.context) {
                    self.shared.report_failure(FailedCall { id, label, error });
                }
                ControlFlow::Continue(())
            }
            AppEvent::User(user) => {
                match self.user_handler.as_mut() {
                    Some(handler) => handler(&self.shared.context, &user),
                    None => {
                        tracing::trace!(target: targets::EVENT_LOOP, kind = user.kind, "user event with no handler")
                    }
                }
                ControlFlow::Continue(())
            }
            AppEvent::WakeUp => ControlFlow::Continue(()),
            AppEvent::Quit => {
                tracing::debug!(target: targets::EVENT_LOOP, "processing quit event");
                ControlFlow::Break(())
            }
        };

        drop(done);
        if flow.is_break() {
            self.shutdown();
        }
        flow
    }
}

/// Marks a popped event as handled when dropped, including during unwinding.
struct EventDone<A>(Arc<Shared<A>>);

impl<A> Drop for EventDone<A> {
    fn drop(&mut self) {
        self.0.queue.complete_one();
    }
}

impl<A> Drop for MainLoop<A> {
    fn drop(&mut self) {
        let leftover = self.shared.queue.close();
        if !leftover.is_empty() {
            tracing::debug!(
                target: targets::EVENT_LOOP,
                dropped = leftover.len(),
                "main loop dropped with events still queued"
            );
        }
    }
}

impl<A> fmt::Debug for MainLoop<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("event_loop", &self.shared.config.name)
            .field("queued", &self.shared.queue.len())
            .field("closed", &self.shared.queue.is_closed())
            .field("has_user_handler", &self.user_handler.is_some())
            .finish()
    }
}

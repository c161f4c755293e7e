//! The dispatch queue shared between submitting threads and the main loop.
//!
//! Any thread may append; only the main loop removes. Appending and closing
//! happen under the same lock, so once [`DispatchQueue::close`] returns no
//! event can slip in behind it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::deferred::{CallId, DeferredCall};
use crate::error::{Result, RpcError};
use crate::event::AppEvent;
use crate::logging::QueuedEntry;

struct QueueState<A> {
    events: VecDeque<AppEvent<A>>,
    /// Sequence counter for call IDs; only advanced under the lock.
    next_sequence: u64,
    /// Events queued or popped but not yet fully handled.
    outstanding: usize,
    closed: bool,
}

/// Mutex-protected FIFO with a condvar to wake the main loop.
pub(crate) struct DispatchQueue<A> {
    state: Mutex<QueueState<A>>,
    wake: Condvar,
}

impl<A> DispatchQueue<A> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                next_sequence: 1,
                outstanding: 0,
                closed: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Append a deferred call, assigning its call ID.
    pub fn push_call(&self, mut call: DeferredCall<A>) -> Result<CallId> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RpcError::DispatchUnavailable);
        }

        let id = CallId::new(state.next_sequence);
        state.next_sequence += 1;
        call.assign_id(id);

        state.events.push_back(AppEvent::Invoke(call));
        state.outstanding += 1;
        drop(state);
        self.wake.notify_one();
        Ok(id)
    }

    /// Append any event.
    pub fn push(&self, event: AppEvent<A>) -> Result<()> {
        let event = match event {
            AppEvent::Invoke(call) => return self.push_call(call).map(|_| ()),
            other => other,
        };

        let mut state = self.state.lock();
        if state.closed {
            return Err(RpcError::DispatchUnavailable);
        }
        state.events.push_back(event);
        state.outstanding += 1;
        drop(state);
        self.wake.notify_one();
        Ok(())
    }

    /// Record that a popped event has been fully handled.
    pub fn complete_one(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
    }

    /// Remove the head of the queue without waiting.
    pub fn pop(&self) -> Option<AppEvent<A>> {
        self.state.lock().events.pop_front()
    }

    /// Remove the head of the queue, waiting until an event arrives.
    ///
    /// With a timeout, returns `None` once it elapses. Also returns `None`
    /// immediately if the queue is closed and empty.
    pub fn wait_pop(&self, timeout: Option<Duration>) -> Option<AppEvent<A>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.closed {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if self.wake.wait_until(&mut state, deadline).timed_out() {
                        return state.events.pop_front();
                    }
                }
                None => self.wake.wait(&mut state),
            }
        }
    }

    /// Mark the queue closed and hand back everything still queued.
    ///
    /// Later pushes fail with [`RpcError::DispatchUnavailable`].
    pub fn close(&self) -> Vec<AppEvent<A>> {
        let mut state = self.state.lock();
        state.closed = true;
        let leftover: Vec<_> = state.events.drain(..).collect();
        state.outstanding = state.outstanding.saturating_sub(leftover.len());
        drop(state);
        self.wake.notify_all();
        leftover
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Number of events queued or still being handled.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Describe the queued events, head first.
    pub fn snapshot(&self) -> Vec<QueuedEntry> {
        self.state
            .lock()
            .events
            .iter()
            .map(|event| match event {
                AppEvent::Invoke(call) => QueuedEntry::Call {
                    id: call.id(),
                    label: call.label(),
                    blocking: call.is_blocking(),
                },
                other => QueuedEntry::Event(other.kind_name()),
            })
            .collect()
    }
}

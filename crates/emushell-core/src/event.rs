//! Event types for the emushell main loop.

use std::fmt;

use crate::deferred::DeferredCall;

/// Events processed by the main loop.
///
/// All kinds share one FIFO queue; there are no priority levels, so an event
/// is handled strictly after everything enqueued before it.
pub enum AppEvent<A> {
    /// Run a deferred method call on the main thread.
    Invoke(DeferredCall<A>),

    /// Application-defined event, delivered to the user event handler.
    User(UserEvent),

    /// Wake up the main loop without doing any work.
    WakeUp,

    /// Stop the main loop and close the dispatch queue.
    Quit,
}

impl<A> AppEvent<A> {
    /// Short name of the event kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Invoke(_) => "invoke",
            Self::User(_) => "user",
            Self::WakeUp => "wake_up",
            Self::Quit => "quit",
        }
    }
}

impl<A> fmt::Debug for AppEvent<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoke(call) => f.debug_tuple("Invoke").field(call).finish(),
            Self::User(event) => f.debug_tuple("User").field(event).finish(),
            Self::WakeUp => f.write_str("WakeUp"),
            Self::Quit => f.write_str("Quit"),
        }
    }
}

/// An application-defined event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    /// User-defined event kind identifier.
    pub kind: u32,
    /// Optional payload as raw bytes (for simple data).
    pub payload: Option<Box<[u8]>>,
}

impl UserEvent {
    /// Create a user event with a kind identifier.
    pub fn new(kind: u32) -> Self {
        Self {
            kind,
            payload: None,
        }
    }

    /// Create a user event with a kind and byte payload.
    pub fn with_payload(kind: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload: Some(payload.into_boxed_slice()),
        }
    }
}

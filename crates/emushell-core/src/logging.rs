//! Logging and debugging facilities for emushell.
//!
//! This module provides:
//! - Target names for filtering `tracing` output per subsystem
//! - A debug view of the dispatch queue
//! - Performance tracing hooks for profiling
//!
//! # Tracing Integration
//!
//! emushell uses the `tracing` crate for instrumentation. The libraries
//! never install a subscriber; to see logs, install one in the application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("emushell_core::dispatch=trace,info")
//!     .init();
//! ```
//!
//! # Queue Inspection
//!
//! ```
//! use std::sync::Arc;
//! use emushell_core::{MainLoop, logging::QueueDebug};
//!
//! let main_loop = MainLoop::new(Arc::new(()));
//! let dispatcher = main_loop.dispatcher();
//! dispatcher.post_method(|_| Ok(())).unwrap();
//!
//! let view = QueueDebug::new(&dispatcher).to_string();
//! assert!(view.starts_with("Dispatch queue (1 queued"));
//! ```

use std::fmt;

use crate::deferred::CallId;
use crate::dispatcher::Dispatcher;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Submission and execution of deferred calls.
    pub const DISPATCH: &str = "emushell_core::dispatch";
    /// Main loop lifecycle.
    pub const EVENT_LOOP: &str = "emushell_core::event_loop";
    /// Pending-save counter.
    pub const PENDING_SAVES: &str = "emushell_core::pending_saves";
    /// Application settings and folder layout.
    pub const SETTINGS: &str = "emushell::settings";
    /// Plugin configuration files.
    pub const PLUGINS: &str = "emushell::plugins";
    /// Performance spans.
    pub const PERF: &str = "emushell::perf";
}

/// One queued event, as seen by [`QueueDebug`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedEntry {
    /// A deferred call.
    Call {
        /// The call's queue position.
        id: Option<CallId>,
        /// The call's label.
        label: &'static str,
        /// Whether a caller is blocked on it.
        blocking: bool,
    },
    /// Any other event kind.
    Event(&'static str),
}

/// Debug view of the events waiting in a dispatcher's queue.
pub struct QueueDebug {
    name: String,
    entries: Vec<QueuedEntry>,
    closed: bool,
}

impl QueueDebug {
    /// Capture the current queue contents.
    pub fn new<A: Send + Sync + 'static>(dispatcher: &Dispatcher<A>) -> Self {
        Self {
            name: dispatcher.config().name.clone(),
            entries: dispatcher.shared.queue.snapshot(),
            closed: !dispatcher.is_accepting(),
        }
    }

    /// The captured entries, head first.
    pub fn entries(&self) -> &[QueuedEntry] {
        &self.entries
    }
}

impl fmt::Display for QueueDebug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Dispatch queue ({} queued, loop \"{}\"{}):",
            self.entries.len(),
            self.name,
            if self.closed { ", closed" } else { "" }
        )?;
        if self.entries.is_empty() {
            return writeln!(f, "  (empty)");
        }
        for entry in &self.entries {
            match entry {
                QueuedEntry::Call { id, label, blocking } => {
                    let id = id.map(|id| id.to_string()).unwrap_or_else(|| "#?".to_string());
                    let mode = if *blocking { "blocking" } else { "async" };
                    writeln!(f, "  {id} {label} ({mode})")?;
                }
                QueuedEntry::Event(kind) => writeln!(f, "  <{kind}>")?,
            }
        }
        Ok(())
    }
}

/// A guard that emits a tracing span when dropped.
///
/// This is useful for tracking the duration of operations.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: targets::PERF, "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

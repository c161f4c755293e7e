//! Configuration for the main loop and its dispatcher.

use std::sync::Arc;
use std::time::Duration;

use crate::main_loop::MainLoop;

/// Default maximum number of events handled per `process_pending` call.
const DEFAULT_BATCH_SIZE: usize = 64;

/// Default capacity of the failed-call report channel.
const DEFAULT_FAILURE_CAPACITY: usize = 256;

/// Configuration for creating a [`MainLoop`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name of the loop, recorded in log events.
    pub name: String,
    /// Maximum number of events handled by one `process_pending` call.
    pub batch_size: usize,
    /// Wait bound used by `try_invoke_blocking`. `None` waits forever.
    pub blocking_timeout: Option<Duration>,
    /// Capacity of the failed-call report channel. Reports beyond this are
    /// logged and dropped.
    pub failure_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            blocking_timeout: None,
            failure_capacity: DEFAULT_FAILURE_CAPACITY,
        }
    }
}

impl DispatcherConfig {
    /// Create a new configuration with the given loop name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for creating main loops with custom configuration.
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loop name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the per-batch event limit. Values below 1 are raised to 1.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    /// Bound the wait of `try_invoke_blocking`.
    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.config.blocking_timeout = Some(timeout);
        self
    }

    /// Set the capacity of the failed-call report channel.
    pub fn failure_capacity(mut self, capacity: usize) -> Self {
        self.config.failure_capacity = capacity;
        self
    }

    /// Get the configuration built so far.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Build the main loop on the current thread, which becomes the main thread.
    pub fn build<A: Send + Sync + 'static>(self, context: Arc<A>) -> MainLoop<A> {
        MainLoop::with_config(context, self.config)
    }
}

//! Core systems for emushell.
//!
//! This crate provides the main-thread RPC machinery of the emushell
//! application shell:
//!
//! - **Main Loop**: the designated main thread's event-processing loop
//! - **Dispatcher**: blocking, fire-and-forget and always-deferred calls
//!   from any thread onto the main thread, in strict FIFO order
//! - **Completion Signals**: one-shot wait/signal primitive carrying the
//!   result of a blocking call back to its caller
//! - **Pending Saves**: a main-thread-only counter of saves that must finish
//!   before exit
//! - **Thread Checks**: affinity assertions and main-thread-only storage
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use emushell_core::{HasPendingSaves, MainLoop, PendingSaveCounter};
//!
//! struct App {
//!     pending_saves: PendingSaveCounter,
//! }
//!
//! impl HasPendingSaves for App {
//!     fn pending_saves(&self) -> &PendingSaveCounter {
//!         &self.pending_saves
//!     }
//! }
//!
//! // The thread that creates the loop becomes the main thread.
//! let app = Arc::new(App { pending_saves: PendingSaveCounter::new() });
//! let mut main_loop = MainLoop::new(app);
//! let dispatcher = main_loop.dispatcher();
//!
//! let saver = dispatcher.clone();
//! std::thread::spawn(move || {
//!     saver.start_pending_save().unwrap();
//!     // ... write the savestate ...
//!     saver.clear_pending_save().unwrap();
//! })
//! .join()
//! .unwrap();
//!
//! main_loop.process_until_idle();
//! assert!(!dispatcher.has_pending_saves());
//! ```

mod completion;
mod config;
mod deferred;
mod dispatcher;
mod error;
mod event;
pub mod logging;
mod main_loop;
mod pending_saves;
mod queue;
pub mod thread_check;

pub use completion::{CompletionHandle, CompletionSignal, CompletionWaiter, completion_pair};
pub use config::{DispatcherBuilder, DispatcherConfig};
pub use deferred::{BoxedMethod, CallId, DeferredCall};
pub use dispatcher::{Dispatcher, FailedCall, Invocation};
pub use error::{CounterUnderflow, MethodError, MethodResult, Result, RpcError};
pub use event::{AppEvent, UserEvent};
pub use logging::PerfSpan;
pub use main_loop::{LoopExit, MainLoop, UserEventHandler};
pub use pending_saves::{HasPendingSaves, PendingSaveCounter};
pub use thread_check::{MainThreadCell, ThreadAffinity};

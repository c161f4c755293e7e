//! Thread affinity verification for emushell.
//!
//! The dispatcher designates exactly one thread as the main thread: the
//! thread that constructed its [`MainLoop`](crate::MainLoop). Code that must
//! only run there uses [`ThreadAffinity`] to check where it is running, and
//! [`MainThreadCell`] for state that is only ever touched on that thread.
//!
//! # Checks
//!
//! Two levels of checking are provided:
//!
//! - **Debug assertions** (`debug_assert_same_thread`): only active in debug
//!   builds.
//! - **Runtime assertions** (`assert_same_thread`): always active. Use for
//!   state whose soundness depends on single-thread access.
//!
//! ```
//! use emushell_core::thread_check::ThreadAffinity;
//!
//! let affinity = ThreadAffinity::current();
//! assert!(affinity.is_same_thread());
//!
//! let is_main = std::thread::spawn(move || affinity.is_same_thread())
//!     .join()
//!     .unwrap();
//! assert!(!is_main);
//! ```

use std::cell::Cell;
use std::fmt;
use std::thread::ThreadId;

/// Thread affinity tracker.
///
/// Records the thread on which it was created and verifies that subsequent
/// operations occur on the same thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Create a new thread affinity tracker for the current thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// Get the thread ID this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Check if the current thread matches this affinity.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Assert that we are on the bound thread.
    ///
    /// This always runs (debug and release builds).
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message if called from a different thread.
    #[inline]
    pub fn assert_same_thread(&self) {
        self.assert_same_thread_with_msg("main-thread state accessed from another thread")
    }

    /// Assert that we are on the bound thread, with a custom message.
    ///
    /// # Panics
    ///
    /// Panics if called from a different thread.
    pub fn assert_same_thread_with_msg(&self, msg: &str) {
        if !self.is_same_thread() {
            self.panic_wrong_thread(msg);
        }
    }

    /// Debug-only assertion that we are on the bound thread.
    ///
    /// This is a no-op in release builds.
    #[inline]
    pub fn debug_assert_same_thread(&self) {
        #[cfg(debug_assertions)]
        self.assert_same_thread();
    }

    /// Debug-only assertion with a custom message.
    #[inline]
    pub fn debug_assert_same_thread_with_msg(&self, msg: &str) {
        #[cfg(debug_assertions)]
        self.assert_same_thread_with_msg(msg);
    }

    #[cold]
    #[inline(never)]
    fn panic_wrong_thread(&self, msg: &str) -> ! {
        let current = std::thread::current();
        let current_name = current.name().unwrap_or("<unnamed>");
        let current_id = current.id();

        panic!(
            "\n\
            ══════════════════════════════════════════════════════════════════════\n\
            THREAD AFFINITY VIOLATION\n\
            ══════════════════════════════════════════════════════════════════════\n\
            \n\
            {msg}\n\
            \n\
            Bound to thread: {:?}\n\
            Current thread: \"{current_name}\" (ID: {current_id:?})\n\
            \n\
            This state belongs to the main thread. Route the operation through\n\
            the dispatcher instead of touching it directly:\n\
            \n\
            1. dispatcher.try_invoke_async(|app| ...)   (fire and forget)\n\
            2. dispatcher.try_invoke_blocking(|app| ...) (wait for completion)\n\
            3. dispatcher.post_method(|app| ...)         (always deferred)\n\
            \n\
            ══════════════════════════════════════════════════════════════════════",
            self.thread_id
        )
    }
}

/// A value owned by a single thread, shareable as part of a `Sync` context.
///
/// Every access asserts that it happens on the owning thread, in all build
/// profiles. Contexts shared with worker threads can therefore hold
/// main-thread-only state without a lock; workers must reach it through the
/// dispatcher.
pub struct MainThreadCell<T> {
    affinity: ThreadAffinity,
    value: Cell<T>,
}

// SAFETY: the inner `Cell` is only read or written after `assert_same_thread`
// succeeds, so all accesses happen on the single owning thread.
unsafe impl<T: Send> Sync for MainThreadCell<T> {}

impl<T: Copy> MainThreadCell<T> {
    /// Create a cell owned by the current thread.
    pub fn new(value: T) -> Self {
        Self::with_affinity(value, ThreadAffinity::current())
    }

    /// Create a cell owned by the thread recorded in `affinity`.
    pub fn with_affinity(value: T, affinity: ThreadAffinity) -> Self {
        Self {
            affinity,
            value: Cell::new(value),
        }
    }

    /// The affinity this cell is bound to.
    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    /// Read the value.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owner.
    pub fn get(&self) -> T {
        self.affinity
            .assert_same_thread_with_msg("MainThreadCell read from another thread");
        self.value.get()
    }

    /// Replace the value.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owner.
    pub fn set(&self, value: T) {
        self.affinity
            .assert_same_thread_with_msg("MainThreadCell written from another thread");
        self.value.set(value);
    }

    /// Apply `f` to the value and store the result, returning the new value.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        let next = f(self.get());
        self.value.set(next);
        next
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for MainThreadCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("MainThreadCell");
        s.field("affinity", &self.affinity);
        if self.affinity.is_same_thread() {
            s.field("value", &self.value.get());
        } else {
            s.field("value", &format_args!("<other thread>"));
        }
        s.finish()
    }
}

static_assertions::assert_impl_all!(MainThreadCell<i64>: Send, Sync);

//! The application context and its main loop.
//!
//! [`EmuApp`] is the state every main-thread method runs against. A
//! [`Shell`] owns the main loop on the main thread; [`ShellHandle`]s are
//! handed to worker threads and route their requests back to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use emushell_core::{
    Dispatcher, DispatcherConfig, HasPendingSaves, Invocation, LoopExit, MainLoop, MethodError,
    PendingSaveCounter, PerfSpan, ThreadAffinity,
};
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::plugin_config::PluginConfigStore;
use crate::settings::{AppSettings, LOG_TARGET};

/// Called on the main thread after settings have been applied.
pub type SettingsListener = Arc<dyn Fn(&AppSettings) + Send + Sync>;

/// Application-wide state.
///
/// Readable from any thread; operations that touch the filesystem layout
/// or notify listeners are main-thread only.
pub struct EmuApp {
    pending_saves: PendingSaveCounter,
    settings: RwLock<AppSettings>,
    settings_path: PathBuf,
    listeners: Mutex<Vec<SettingsListener>>,
    plugin_folder: RwLock<Option<PathBuf>>,
    bios_path: RwLock<Option<PathBuf>>,
    main_thread: ThreadAffinity,
}

impl EmuApp {
    /// Create the context on the current thread, which becomes the main thread.
    pub fn new(settings: AppSettings, settings_path: impl Into<PathBuf>) -> Self {
        let main_thread = ThreadAffinity::current();
        Self {
            pending_saves: PendingSaveCounter::with_affinity(main_thread),
            settings: RwLock::new(settings),
            settings_path: settings_path.into(),
            listeners: Mutex::new(Vec::new()),
            plugin_folder: RwLock::new(None),
            bios_path: RwLock::new(None),
            main_thread,
        }
    }

    /// A copy of the current settings.
    pub fn settings(&self) -> AppSettings {
        self.settings.read().clone()
    }

    /// Modify settings in place. Takes effect on the next [`apply_settings`](Self::apply_settings).
    pub fn update_settings(&self, f: impl FnOnce(&mut AppSettings)) {
        f(&mut self.settings.write());
    }

    /// Where settings are saved.
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Register a listener for applied settings.
    pub fn on_settings_applied<F>(&self, listener: F)
    where
        F: Fn(&AppSettings) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// The plugin settings folder, once settings have been applied.
    pub fn plugin_folder(&self) -> Option<PathBuf> {
        self.plugin_folder.read().clone()
    }

    /// Full path of the selected BIOS image, once settings have been applied.
    pub fn bios_path(&self) -> Option<PathBuf> {
        self.bios_path.read().clone()
    }

    /// Null plugin configuration files in the plugin settings folder.
    pub fn plugin_configs(&self) -> Option<PluginConfigStore> {
        self.plugin_folder().map(PluginConfigStore::new)
    }

    /// Apply the current settings.
    ///
    /// Fills in default folders, creates the folders emulation relies on,
    /// resolves the BIOS path, points plugins at the settings folder and
    /// notifies listeners. Plugins themselves are not reloaded. Listeners
    /// may register further listeners; those run from the next apply on.
    ///
    /// # Panics
    ///
    /// Panics if called off the main thread.
    pub fn apply_settings(&self) -> Result<()> {
        self.main_thread
            .assert_same_thread_with_msg("apply_settings must be called on the main thread");
        let _span = PerfSpan::new("apply_settings");

        let applied = {
            let mut settings = self.settings.write();
            settings.apply_defaults();
            settings.folders.ensure_exist()?;
            *self.plugin_folder.write() = settings.folders.settings.clone();
            *self.bios_path.write() = settings.full_path_to_bios();
            settings.clone()
        };

        if applied.mcd_compress {
            tracing::debug!(
                target: LOG_TARGET,
                "memory-card folder compression requested; not supported here, skipping"
            );
        }

        tracing::info!(
            target: LOG_TARGET,
            base = %applied.resolved_base_folder().display(),
            "settings applied"
        );
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener(&applied);
        }
        Ok(())
    }

    /// Write the current settings to [`settings_path`](Self::settings_path).
    ///
    /// # Panics
    ///
    /// Panics if called off the main thread.
    pub fn save_settings(&self) -> Result<()> {
        self.main_thread
            .assert_same_thread_with_msg("save_settings must be called on the main thread");
        let _span = PerfSpan::new("save_settings");
        self.settings.read().save(&self.settings_path)
    }
}

impl HasPendingSaves for EmuApp {
    fn pending_saves(&self) -> &PendingSaveCounter {
        &self.pending_saves
    }
}

impl std::fmt::Debug for EmuApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmuApp")
            .field("settings_path", &self.settings_path)
            .field("plugin_folder", &*self.plugin_folder.read())
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

/// The application's main loop. Lives on the main thread.
pub struct Shell {
    main_loop: MainLoop<EmuApp>,
}

impl Shell {
    /// Create the shell on the current thread, which becomes the main thread.
    pub fn new(settings: AppSettings, settings_path: impl Into<PathBuf>) -> Self {
        Self::with_config(settings, settings_path, DispatcherConfig::with_name("shell"))
    }

    /// Create the shell with a custom dispatcher configuration.
    pub fn with_config(
        settings: AppSettings,
        settings_path: impl Into<PathBuf>,
        config: DispatcherConfig,
    ) -> Self {
        let app = Arc::new(EmuApp::new(settings, settings_path));
        Self {
            main_loop: MainLoop::with_config(app, config),
        }
    }

    /// The application context.
    pub fn app(&self) -> &Arc<EmuApp> {
        self.main_loop.context()
    }

    /// A handle for worker threads.
    pub fn handle(&self) -> ShellHandle {
        ShellHandle {
            dispatcher: self.main_loop.dispatcher(),
        }
    }

    /// The underlying main loop.
    pub fn main_loop(&mut self) -> &mut MainLoop<EmuApp> {
        &mut self.main_loop
    }

    /// Run until a quit request is processed.
    pub fn run(&mut self) -> Result<()> {
        Ok(self.main_loop.run()?)
    }

    /// Keep the loop running until no save is pending or `timeout` elapses.
    ///
    /// Returns whether all saves finished. Call this before exiting.
    pub fn wait_for_pending_saves(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.main_loop.process_until_idle();
            if !self.app().pending_saves().has_pending() {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    target: LOG_TARGET,
                    pending = self.app().pending_saves().count(),
                    "pending saves did not finish in time"
                );
                return Ok(false);
            }
            if self.main_loop.run_for(remaining.min(Duration::from_millis(10)))? == LoopExit::Quit {
                return Ok(!self.app().pending_saves().has_pending());
            }
        }
    }

    /// Close the loop, dropping anything still queued.
    pub fn shutdown(&mut self) -> usize {
        self.main_loop.shutdown()
    }
}

/// Cloneable handle to the shell for any thread.
#[derive(Clone)]
pub struct ShellHandle {
    dispatcher: Dispatcher<EmuApp>,
}

impl ShellHandle {
    /// The underlying dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<EmuApp> {
        &self.dispatcher
    }

    /// The application context.
    pub fn app(&self) -> &Arc<EmuApp> {
        self.dispatcher.context()
    }

    /// Save settings on the main thread, waiting until done.
    pub fn save_settings(&self) -> Result<()> {
        self.dispatcher
            .process_method(|app: &EmuApp| app.save_settings().map_err(MethodError::from_source))?;
        Ok(())
    }

    /// Apply settings on the main thread, waiting until done.
    pub fn apply_settings(&self) -> Result<()> {
        let invocation = self
            .dispatcher
            .try_invoke_blocking(|app: &EmuApp| app.apply_settings().map_err(MethodError::from_source))?;
        if invocation == Invocation::NotDispatched {
            self.app().apply_settings()?;
        }
        Ok(())
    }

    /// Mark the start of a save that must finish before exit.
    pub fn start_pending_save(&self) -> Result<()> {
        Ok(self.dispatcher.start_pending_save()?)
    }

    /// Mark the end of a save started with [`start_pending_save`](Self::start_pending_save).
    pub fn clear_pending_save(&self) -> Result<()> {
        Ok(self.dispatcher.clear_pending_save()?)
    }

    /// Ask the main loop to stop.
    pub fn quit(&self) -> Result<()> {
        Ok(self.dispatcher.quit()?)
    }
}

impl std::fmt::Debug for ShellHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellHandle")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

static_assertions::assert_impl_all!(ShellHandle: Send, Sync, Clone);

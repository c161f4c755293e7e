//! emushell - application shell for a PS2 emulator front end.
//!
//! This is the umbrella crate. It re-exports the main-thread dispatch
//! machinery of `emushell-core` and adds the application context, settings
//! and folder management, and the null plugin configuration files.
//!
//! # Example
//!
//! ```no_run
//! use emushell::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = default_settings_path().unwrap_or_else(|| "emushell.toml".into());
//!     let mut shell = Shell::new(AppSettings::load_or_default(&path)?, path);
//!     shell.handle().apply_settings()?;
//!
//!     let worker = shell.handle();
//!     std::thread::spawn(move || {
//!         worker.start_pending_save()?;
//!         // ... write the savestate ...
//!         worker.clear_pending_save()?;
//!         worker.save_settings()?;
//!         worker.quit()
//!     });
//!
//!     shell.run()?;
//!     Ok(())
//! }
//! ```

pub use emushell_core::*;

pub mod app;
pub mod error;
pub mod plugin_config;
pub mod prelude;
pub mod settings;

pub use app::{EmuApp, SettingsListener, Shell, ShellHandle};
pub use error::ShellError;
pub use plugin_config::{NullPlugin, NullPluginConfig, PluginConfigStore};
pub use settings::{AppSettings, Folders};

//! Prelude module for emushell.
//!
//! ```ignore
//! use emushell::prelude::*;
//! ```

// ============================================================================
// Application
// ============================================================================

pub use crate::app::{EmuApp, Shell, ShellHandle};
pub use crate::error::ShellError;
pub use crate::settings::{AppSettings, Folders, default_base_folder, default_settings_path};

// ============================================================================
// Main-Thread Dispatch
// ============================================================================

pub use emushell_core::{
    Dispatcher, HasPendingSaves, Invocation, MainLoop, MethodError, MethodResult, RpcError,
};

// ============================================================================
// Plugins
// ============================================================================

pub use crate::plugin_config::{NullPlugin, NullPluginConfig, PluginConfigStore};

//! Error types for the application shell.

use std::path::PathBuf;

use emushell_core::RpcError;

/// Result type alias for shell operations.
pub type Result<T> = std::result::Result<T, ShellError>;

/// Errors that can occur in the application shell.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// File or folder I/O error.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plugin INI file could not be read or parsed.
    #[error("Failed to read plugin config '{path}': {source}")]
    Ini {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// Settings file could not be parsed or encoded.
    #[error("Invalid settings file '{path}': {message}")]
    Settings { path: PathBuf, message: String },

    /// A call routed through the main thread failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ShellError {
    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a settings error.
    pub fn settings(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Settings {
            path: path.into(),
            message: message.into(),
        }
    }
}

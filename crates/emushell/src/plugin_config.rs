//! Configuration files of the built-in null plugins.
//!
//! Each null plugin keeps a single INI file in the settings folder with one
//! recognized key, `logging`. A missing or unreadable file is not an error:
//! defaults are written in its place and returned.

use std::fmt;
use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::{Result, ShellError};

/// Target name for plugin configuration logs.
pub const LOG_TARGET: &str = emushell_core::logging::targets::PLUGINS;

const LOGGING_KEY: &str = "logging";

/// The null plugins shipped with the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullPlugin {
    /// Graphics synthesizer.
    Gs,
    /// Controller pad.
    Pad,
}

impl NullPlugin {
    /// All null plugins.
    pub const ALL: [NullPlugin; 2] = [NullPlugin::Gs, NullPlugin::Pad];

    /// Short plugin name.
    pub fn name(self) -> &'static str {
        match self {
            NullPlugin::Gs => "GS",
            NullPlugin::Pad => "PAD",
        }
    }

    /// INI file name inside the settings folder.
    pub fn file_name(self) -> &'static str {
        match self {
            NullPlugin::Gs => "GSNull.ini",
            NullPlugin::Pad => "Padnull.ini",
        }
    }

    /// Text for the plugin's about box.
    pub fn about(self) -> String {
        format!("{}null: A simple null plugin.", self.name())
    }
}

impl fmt::Display for NullPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings stored in a null plugin's INI file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullPluginConfig {
    /// Logging level; 0 disables plugin logging.
    pub logging: i32,
}

impl NullPluginConfig {
    /// Whether plugin logging is enabled.
    pub fn logging_enabled(&self) -> bool {
        self.logging != 0
    }

    fn from_ini(ini: &Ini) -> Self {
        let logging = ini
            .get_from(None::<String>, LOGGING_KEY)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0);
        Self { logging }
    }

    fn to_ini(self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(None::<String>)
            .set(LOGGING_KEY, self.logging.to_string());
        ini
    }
}

/// Reads and writes null plugin INI files in one settings folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfigStore {
    folder: PathBuf,
}

impl PluginConfigStore {
    /// Create a store over `folder`.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// The settings folder.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Full path of `plugin`'s INI file.
    pub fn path(&self, plugin: NullPlugin) -> PathBuf {
        self.folder.join(plugin.file_name())
    }

    /// Load `plugin`'s configuration.
    ///
    /// If the file cannot be opened, defaults are saved in its place and
    /// returned. A file that exists but does not parse is an error.
    pub fn load(&self, plugin: NullPlugin) -> Result<NullPluginConfig> {
        let path = self.path(plugin);
        match Ini::load_from_file(&path) {
            Ok(ini) => Ok(NullPluginConfig::from_ini(&ini)),
            Err(ini::Error::Io(err)) => {
                tracing::info!(
                    target: LOG_TARGET,
                    plugin = %plugin,
                    path = %path.display(),
                    error = %err,
                    "failed to open plugin config; writing defaults"
                );
                let config = NullPluginConfig::default();
                if let Err(err) = self.save(plugin, &config) {
                    tracing::warn!(target: LOG_TARGET, plugin = %plugin, "{err}");
                }
                Ok(config)
            }
            Err(source) => Err(ShellError::Ini { path, source }),
        }
    }

    /// Write `config` to `plugin`'s INI file.
    pub fn save(&self, plugin: NullPlugin, config: &NullPluginConfig) -> Result<()> {
        let path = self.path(plugin);
        config
            .to_ini()
            .write_to_file(&path)
            .map_err(|e| ShellError::io(&path, e))?;
        tracing::debug!(target: LOG_TARGET, plugin = %plugin, logging = config.logging, "plugin config saved");
        Ok(())
    }

    /// Load, set the logging option, and save `plugin`'s configuration.
    pub fn configure(&self, plugin: NullPlugin, logging: bool) -> Result<NullPluginConfig> {
        let mut config = self.load(plugin)?;
        config.logging = i32::from(logging);
        self.save(plugin, &config)?;
        Ok(config)
    }
}

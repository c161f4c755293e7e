//! Application settings and folder layout.
//!
//! Settings are persisted as TOML. Folders left unset in the file are
//! filled in relative to a base folder by [`Folders::apply_defaults`].
//!
//! ```
//! use std::path::Path;
//! use emushell::settings::AppSettings;
//!
//! let mut settings = AppSettings::default();
//! settings.folders.apply_defaults(Path::new("/home/user/emushell"));
//! assert_eq!(
//!     settings.folders.memory_cards.as_deref(),
//!     Some(Path::new("/home/user/emushell/memcards"))
//! );
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShellError};

/// Target name for settings logs.
pub const LOG_TARGET: &str = emushell_core::logging::targets::SETTINGS;

/// Default settings file name inside the settings folder.
pub const SETTINGS_FILE_NAME: &str = "emushell.toml";

/// User-configurable folders.
///
/// `None` means "use the default under the base folder".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Folders {
    pub memory_cards: Option<PathBuf>,
    pub savestates: Option<PathBuf>,
    pub snapshots: Option<PathBuf>,
    pub cheats: Option<PathBuf>,
    pub cheats_ws: Option<PathBuf>,
    /// Where BIOS images are looked up.
    pub bios: Option<PathBuf>,
    /// Where plugin INI files live.
    pub settings: Option<PathBuf>,
}

impl Folders {
    /// Fill every unset folder with its default under `base`.
    pub fn apply_defaults(&mut self, base: &Path) {
        let defaults: [(&mut Option<PathBuf>, &str); 7] = [
            (&mut self.memory_cards, "memcards"),
            (&mut self.savestates, "sstates"),
            (&mut self.snapshots, "snaps"),
            (&mut self.cheats, "cheats"),
            (&mut self.cheats_ws, "cheats_ws"),
            (&mut self.bios, "bios"),
            (&mut self.settings, "inis"),
        ];
        for (folder, name) in defaults {
            if folder.is_none() {
                *folder = Some(base.join(name));
            }
        }
    }

    /// Folders that must exist before emulation starts.
    pub fn required(&self) -> impl Iterator<Item = &Path> {
        [
            &self.memory_cards,
            &self.savestates,
            &self.snapshots,
            &self.cheats,
            &self.cheats_ws,
        ]
        .into_iter()
        .filter_map(|folder| folder.as_deref())
    }

    /// Create every required folder that is set.
    pub fn ensure_exist(&self) -> Result<()> {
        for folder in self.required() {
            std::fs::create_dir_all(folder).map_err(|e| ShellError::io(folder, e))?;
            tracing::trace!(target: LOG_TARGET, folder = %folder.display(), "folder ready");
        }
        Ok(())
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Base folder for defaults; the platform default when unset.
    pub base_folder: Option<PathBuf>,
    pub folders: Folders,
    /// Selected BIOS image, relative to the BIOS folder unless absolute.
    pub bios_file: Option<PathBuf>,
    /// Request filesystem compression of the memory-card folder.
    ///
    /// Persisted only. The shell applies no compression itself;
    /// [`EmuApp::apply_settings`](crate::EmuApp::apply_settings) logs that
    /// the request was skipped.
    pub mcd_compress: bool,
}

impl AppSettings {
    /// The base folder defaults are derived from.
    ///
    /// Falls back to the current directory when no platform folder exists.
    pub fn resolved_base_folder(&self) -> PathBuf {
        self.base_folder
            .clone()
            .or_else(default_base_folder)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Fill unset folders from the base folder.
    pub fn apply_defaults(&mut self) {
        let base = self.resolved_base_folder();
        self.folders.apply_defaults(&base);
    }

    /// Full path of the selected BIOS image, if one is selected.
    ///
    /// Relative names resolve against the BIOS folder once defaults have
    /// been applied.
    pub fn full_path_to_bios(&self) -> Option<PathBuf> {
        let file = self.bios_file.as_deref()?;
        match self.folders.bios.as_deref() {
            Some(folder) if file.is_relative() => Some(folder.join(file)),
            _ => Some(file.to_path_buf()),
        }
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(s: &str, path: &Path) -> Result<Self> {
        toml::from_str(s).map_err(|e| ShellError::settings(path, e.to_string()))
    }

    /// Serialize settings to TOML text.
    pub fn to_toml_string(&self, path: &Path) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ShellError::settings(path, e.to_string()))
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ShellError::io(path, e))?;
        let settings = Self::from_toml_str(&content, path)?;
        tracing::debug!(target: LOG_TARGET, path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Load settings, or return defaults if the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(ShellError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(target: LOG_TARGET, path = %path.display(), "no settings file; using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Save settings to a TOML file, creating its folder if needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_toml_string(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ShellError::io(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| ShellError::io(path, e))?;
        tracing::debug!(target: LOG_TARGET, path = %path.display(), "settings saved");
        Ok(())
    }
}

/// Platform default base folder, e.g. `~/Documents/emushell`.
pub fn default_base_folder() -> Option<PathBuf> {
    if let Some(user) = directories::UserDirs::new()
        && let Some(documents) = user.document_dir()
    {
        return Some(documents.join("emushell"));
    }
    directories::ProjectDirs::from("", "", "emushell").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Platform default settings file location.
pub fn default_settings_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "emushell")
        .map(|dirs| dirs.config_dir().join(SETTINGS_FILE_NAME))
}

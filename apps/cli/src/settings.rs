//! Harness settings file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings file looked up in the working directory.
pub const SETTINGS_FILE: &str = "metasweep.toml";

/// Names an explicit settings file.
pub const SETTINGS_ENV: &str = "METASWEEP_SETTINGS";

/// Defaults for command-line options. Every field is optional; arguments
/// given on the command line win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Config directory
    #[serde(default)]
    pub config_dir: Option<PathBuf>,

    /// Primary config name
    #[serde(default)]
    pub config_name: Option<String>,

    /// Log level
    #[serde(default)]
    pub log_level: Option<String>,

    /// Submission concurrency
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file not found: {0}")]
    NotFound(String),

    #[error("failed to read settings file: {0}")]
    ReadError(String),

    #[error("failed to parse settings file: {0}")]
    ParseError(String),
}

pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

impl Settings {
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| SettingsError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Load the file named by `METASWEEP_SETTINGS`, else `./metasweep.toml`
    /// when present, else defaults.
    pub fn discover_and_load() -> SettingsResult<Self> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV) {
            return Self::load_from_file(Path::new(&path));
        }
        let local = Path::new(SETTINGS_FILE);
        if local.exists() {
            return Self::load_from_file(local);
        }
        Ok(Self::default())
    }
}

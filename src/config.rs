use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{PadError, Result};

/// Application configuration settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// File holding the persisted notes, active pointer and settings
    pub store_path: PathBuf,

    /// Quiet period before an edit is autosaved (in milliseconds)
    pub autosave_debounce_ms: u64,

    /// Fallback autosave period (in seconds)
    pub autosave_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            autosave_debounce_ms: 1000,
            autosave_interval_secs: 5,
        }
    }
}

impl Config {
    /// Loads the configuration file at `path`, or the defaults when no path
    /// is given. Fields missing from the file keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("No configuration file given, using defaults");
            return Ok(Self::default());
        };

        info!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path).map_err(|e| PadError::ConfigError {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;

        serde_json::from_str(&text).map_err(|e| PadError::ConfigError {
            message: format!("invalid configuration in {}: {}", path.display(), e),
        })
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }
}

// Falls back to the working directory when the platform has no data dir
fn default_store_path() -> PathBuf {
    ProjectDirs::from("", "", "purenote")
        .map(|dirs| dirs.data_dir().join("store.json"))
        .unwrap_or_else(|| PathBuf::from("purenote-store.json"))
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DIRECTORY_URL, RELAY_URL, TIMELINE_WINDOW_SECS};
use crate::validation::FilterSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Core configuration, loadable from a JSON file with camelCase keys.
/// Missing keys fall back to [`CoreConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub relay_url: String,
    /// Base URL of the NIP-05 directory, without the `/.well-known` suffix
    pub directory_url: String,
    pub timeline_window_secs: u64,
    /// Initial filter flags handed to the settings channel
    pub filter: FilterSettings,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write config as pretty JSON, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(write_err)
    }

    /// Path of the SQLite document database inside `data_dir`
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("blocknotes.db")
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("blocknotes_data"),
            relay_url: RELAY_URL.to_string(),
            directory_url: DIRECTORY_URL.to_string(),
            timeline_window_secs: TIMELINE_WINDOW_SECS,
            filter: FilterSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"relayUrl": "wss://nos.lol", "filter": {"hideSpam": true}}"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.relay_url, "wss://nos.lol");
        assert_eq!(config.directory_url, DIRECTORY_URL);
        assert_eq!(config.timeline_window_secs, TIMELINE_WINDOW_SECS);
        assert!(config.filter.hide_spam);
        assert!(!config.filter.hide_invoice);
        assert!(!config.filter.paused);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = CoreConfig::new(dir.path());
        config.filter.hide_invoice = true;
        config.save(&path).unwrap();

        let loaded = CoreConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = CoreConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

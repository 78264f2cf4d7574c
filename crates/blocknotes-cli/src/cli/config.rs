use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blocknotes_core::CoreConfig;

const CONFIG_FILE: &str = "config.json";

/// Values given on the command line; each one wins over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub relay_url: Option<String>,
    pub directory_url: Option<String>,
}

/// `<platform data dir>/blocknotes`, or `./blocknotes_data` when the platform has none
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("blocknotes"))
        .unwrap_or_else(|| PathBuf::from("blocknotes_data"))
}

/// Where the config file lives for a given data dir
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Build the effective config.
///
/// An explicit `--config` file must exist. Otherwise `config.json` inside the
/// data dir is used when present, and defaults apply when it is not.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<(CoreConfig, PathBuf)> {
    let data_dir = overrides.data_dir.clone().unwrap_or_else(default_data_dir);

    let (mut config, path) = match &overrides.config {
        Some(path) => {
            let config = CoreConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            (config, path.clone())
        }
        None => {
            let path = config_path(&data_dir);
            let config = if path.exists() {
                CoreConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            } else {
                CoreConfig::new(&data_dir)
            };
            (config, path)
        }
    };

    if let Some(dir) = &overrides.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(url) = &overrides.relay_url {
        config.relay_url = url.clone();
    }
    if let Some(url) = &overrides.directory_url {
        config.directory_url = url.clone();
    }

    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_no_file() {
        let dir = tempdir().unwrap();
        let overrides = ConfigOverrides {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let (config, path) = resolve_config(&overrides).unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.relay_url, blocknotes_core::constants::RELAY_URL);
        assert_eq!(path, dir.path().join("config.json"));
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempdir().unwrap();
        let mut saved = CoreConfig::new(dir.path());
        saved.relay_url = "wss://from-file.example".to_string();
        saved.directory_url = "https://dir.example".to_string();
        saved.save(&config_path(dir.path())).unwrap();

        let overrides = ConfigOverrides {
            data_dir: Some(dir.path().to_path_buf()),
            relay_url: Some("wss://from-flag.example".to_string()),
            ..Default::default()
        };
        let (config, _) = resolve_config(&overrides).unwrap();
        assert_eq!(config.relay_url, "wss://from-flag.example");
        assert_eq!(config.directory_url, "https://dir.example");
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempdir().unwrap();
        let overrides = ConfigOverrides {
            config: Some(dir.path().join("nope.json")),
            ..Default::default()
        };
        assert!(resolve_config(&overrides).is_err());
    }
}

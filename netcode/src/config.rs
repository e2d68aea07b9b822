//! Session tunables, loadable from a JSON file.

use crate::error::ConfigError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: &str = "1.0";
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub port: u16,
    pub max_clients: usize,
    pub snapshot_interval_ms: u64,
    pub countdown_secs: u64,
    /// Roster size required before the ready check can start a countdown.
    pub min_players: usize,
    pub input_history_capacity: usize,
    /// Server joins its own roster as player 0, always ready.
    pub host_participates: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: shared::DEFAULT_PORT,
            max_clients: shared::DEFAULT_MAX_CLIENTS,
            snapshot_interval_ms: shared::SNAPSHOT_INTERVAL_MS,
            countdown_secs: shared::COUNTDOWN_SECS,
            min_players: shared::MIN_PLAYERS,
            input_history_capacity: shared::INPUT_HISTORY_CAPACITY,
            host_participates: false,
        }
    }
}

#[derive(Serialize)]
struct VersionedConfig<'a> {
    version: &'a str,
    #[serde(flatten)]
    config: &'a NetConfig,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<String>,
}

impl NetConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    /// Loads a config file; a missing file yields the defaults.
    ///
    /// Keys absent from the file keep their default values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let size = std::fs::metadata(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if size > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: MAX_CONFIG_FILE_SIZE,
            });
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let probe: VersionProbe = serde_json::from_str(text)?;
        match probe.version.as_deref() {
            None => info!("Config has no version field, assuming legacy format"),
            Some(CONFIG_VERSION) | Some("") => {}
            Some(other) => warn!(
                "Config version {} may not be fully compatible with {}",
                other, CONFIG_VERSION
            ),
        }

        serde_json::from_str(text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(&VersionedConfig {
            version: CONFIG_VERSION,
            config: self,
        })
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("netcode-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_defaults_match_protocol() {
        let config = NetConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.max_clients, 4);
        assert_eq!(config.snapshot_interval(), Duration::from_millis(50));
        assert_eq!(config.countdown(), Duration::from_secs(3));
        assert_eq!(config.min_players, 2);
        assert_eq!(config.input_history_capacity, 60);
        assert!(!config.host_participates);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = NetConfig::from_json(r#"{"port": 9000, "unknownKey": true}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_clients, 4);
        assert_eq!(config.countdown_secs, 3);
    }

    #[test]
    fn test_newer_version_still_loads() {
        let config = NetConfig::from_json(r#"{"version": "9.9", "max_clients": 8}"#).unwrap();
        assert_eq!(config.max_clients, 8);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(NetConfig::from_json("{not json").is_err());
        assert!(NetConfig::from_json(r#"{"port": "high"}"#).is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);
        assert_eq!(NetConfig::load(&path).unwrap(), NetConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("saved");
        let config = NetConfig {
            port: 8123,
            host_participates: true,
            ..NetConfig::default()
        };

        config.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"version\": \"1.0\""));

        let loaded = NetConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_oversized_file_rejected() {
        let path = temp_path("oversized");
        let padding = " ".repeat(MAX_CONFIG_FILE_SIZE as usize + 1);
        std::fs::write(&path, format!("{{}}{}", padding)).unwrap();

        let result = NetConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::TooLarge { .. })));
        let _ = std::fs::remove_file(&path);
    }
}

//! Configuration module
//!
//! Handles loading and saving duelnet configuration. Command-line
//! flags always win over file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::DEFAULT_PORT;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub battle: BattleSettings,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Player name shown to the opponent. Defaults to the hostname.
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "player".to_string()),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Port to host on or dial
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Use local-network broadcast instead of direct addressing
    #[serde(default)]
    pub broadcast: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            broadcast: false,
        }
    }
}

/// Battle configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BattleSettings {
    /// Default combatant to field
    pub combatant: Option<String>,
    /// Accept challengers without prompting
    #[serde(default)]
    pub auto_accept: bool,
    /// Path to a custom roster file
    pub roster: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("duelnet/config.toml")),
            Some(PathBuf::from("./duelnet.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> String {
    let config = Config {
        general: GeneralConfig {
            name: "Ash".to_string(),
            verbose: false,
        },
        network: NetworkSettings {
            port: DEFAULT_PORT,
            bind_address: None,
            broadcast: false,
        },
        battle: BattleSettings {
            combatant: Some("Emberfox".to_string()),
            auto_accept: false,
            roster: None,
        },
    };

    toml::to_string_pretty(&config).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert!(!config.battle.auto_accept);
    }

    #[test]
    fn test_save_and_load() {
        let config = Config::default();
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.network.port, config.network.port);
        assert_eq!(loaded.general.name, config.general.name);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.battle.combatant.as_deref(), Some("Emberfox"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = Config::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}

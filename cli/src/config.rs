// Configuration management for the onionrelay CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/onionrelay/config.json
// - Linux: ~/.config/onionrelay/config.json
// - Windows: %APPDATA%\onionrelay\config.json

use anyhow::{Context, Result};
use onionrelay_core::Topology;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,

    /// Where every service listens
    pub network: Topology,

    /// Node counts for `onionrelay network`
    pub launch: LaunchConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Relays 1..=relays
    pub relays: u32,

    /// Users 1..=users
    pub users: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            network: Topology::default(),
            launch: LaunchConfig::default(),
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            relays: 10,
            users: 2,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("onionrelay");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the default config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Resolve `--config` or fall back to the default location
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::config_file(),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "log_level" => {
                self.log_level = value.to_string();
            }
            "host" => {
                self.network.host = value.parse().context("Invalid IP address")?;
            }
            "registry_port" => {
                self.network.registry_port = value.parse().context("Invalid port number")?;
            }
            "relay_base_port" => {
                self.network.relay_base_port = value.parse().context("Invalid port number")?;
            }
            "user_base_port" => {
                self.network.user_base_port = value.parse().context("Invalid port number")?;
            }
            "relays" => {
                self.launch.relays = value.parse().context("Invalid number")?;
            }
            "users" => {
                self.launch.users = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "log_level" => Some(self.log_level.clone()),
            "host" => Some(self.network.host.to_string()),
            "registry_port" => Some(self.network.registry_port.to_string()),
            "relay_base_port" => Some(self.network.relay_base_port.to_string()),
            "user_base_port" => Some(self.network.user_base_port.to_string()),
            "relays" => Some(self.launch.relays.to_string()),
            "users" => Some(self.launch.users.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        [
            "log_level",
            "host",
            "registry_port",
            "relay_base_port",
            "user_base_port",
            "relays",
            "users",
        ]
        .iter()
        .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
        .collect()
    }
}

//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener and session settings.
    pub net: NetConfig,
    /// Logging settings.
    pub log: LogConfig,
    /// Traffic statistics settings.
    pub stats: StatsConfig,
}

/// Listener and session configuration.
///
/// The lobby service binds `base_port`; the chat service binds
/// `base_port + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetConfig {
    /// Address the listeners bind on.
    pub listen_host: String,
    /// Port of the first service; further services use consecutive ports.
    pub base_port: u16,
    /// Simultaneous client limit per service.
    pub max_clients: usize,
    /// Game ticks per second.
    pub tick_rate: u32,
    /// Largest message payload accepted, in bytes.
    pub max_frame_payload: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
    /// Optional log file; console output stays on either way.
    pub file: Option<PathBuf>,
}

/// Traffic statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between traffic dumps. Zero disables them.
    pub dump_interval_secs: u64,
}

// --- Default implementations ---

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            base_port: 9601,
            max_clients: 1000,
            tick_rate: 20,
            max_frame_payload: 64 * 1024,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            dump_interval_secs: 10,
        }
    }
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }
}

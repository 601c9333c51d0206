//! Configuration module
//!
//! Handles loading and saving craftnet configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::buffer::DEFAULT_HIGH_WATERMARK;
use crate::network::{NetworkConfig as ListenerConfig, SessionConfig};
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

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Game server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface to bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Resume reading once a client's input drains to this many bytes
    #[serde(default)]
    pub low_watermark: usize,
    /// Pause reading once this many bytes are buffered (0 = no limit)
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    /// Outbound packets queued per client before workers wait
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_high_watermark() -> usize {
    DEFAULT_HIGH_WATERMARK
}

fn default_outbound_queue() -> usize {
    256
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            low_watermark: 0,
            high_watermark: default_high_watermark(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of workers
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Jobs each worker may have queued
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Game server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name used in join messages
    #[serde(default = "default_name")]
    pub name: String,
    /// Lines sent to every player after login
    #[serde(default = "default_motd")]
    pub motd: Vec<String>,
    /// Logins beyond this are refused
    #[serde(default = "default_max_players")]
    pub max_players: usize,
}

fn default_name() -> String {
    "craftnet".to_string()
}

fn default_motd() -> Vec<String> {
    vec!["Welcome to craftnet!".to_string()]
}

fn default_max_players() -> usize {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            motd: default_motd(),
            max_players: default_max_players(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("craftnet/craftnet.toml")),
            Some(PathBuf::from("./craftnet.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        // Return default config if no file found
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

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        let network = &self.network;
        if network.high_watermark != 0 && network.low_watermark > network.high_watermark {
            return Err(ConfigError::Invalid(format!(
                "low_watermark ({}) exceeds high_watermark ({})",
                network.low_watermark, network.high_watermark
            )));
        }
        if self.workers.count == 0 {
            return Err(ConfigError::Invalid("workers.count must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Listener settings for the network layer
    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            bind: self.network.bind.clone(),
            port: self.network.port,
            low_watermark: self.network.low_watermark,
            high_watermark: self.network.high_watermark,
            outbound_queue: self.network.outbound_queue,
        }
    }

    /// Settings for the session handler
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            server_name: self.server.name.clone(),
            motd: self.server.motd.clone(),
            max_players: self.server.max_players,
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        workers: WorkersConfig {
            count: 4,
            queue_capacity: default_queue_capacity(),
        },
        server: ServerConfig {
            name: "My Server".to_string(),
            motd: vec![
                "Welcome to My Server!".to_string(),
                "Be nice.".to_string(),
            ],
            max_players: 32,
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.network.high_watermark, DEFAULT_HIGH_WATERMARK);
        assert!(config.workers.count >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.server.max_players = 3;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.network.port, config.network.port);
        assert_eq!(loaded.server.max_players, 3);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nport = 25570\n\n[server]\nmotd = [\"hi\"]").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network.port, 25570);
        assert_eq!(config.network.bind, "0.0.0.0");
        assert_eq!(config.server.motd, vec!["hi".to_string()]);
        assert_eq!(config.server.max_players, default_max_players());
        assert_eq!(config.workers.queue_capacity, default_queue_capacity());
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nlow_watermark = 100\nhigh_watermark = 10").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.server.name, "My Server");
        assert_eq!(parsed.workers.count, 4);
    }

    #[test]
    fn test_conversions() {
        let config = Config::default();
        let listener = config.listener();
        assert_eq!(listener.port, config.network.port);
        assert_eq!(listener.high_watermark, config.network.high_watermark);

        let session = config.session();
        assert_eq!(session.motd, config.server.motd);
    }
}

//! Configuration module
//!
//! Handles loading and saving Soulwire configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::{self, DEFAULT_BACKLOG};
use crate::protocol::{
    ByteOrder, WireFormat, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PORT, DEFAULT_READ_CHUNK_SIZE,
};

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

    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Human-readable name for this server
    #[serde(default = "default_name")]
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Pending connection queue length
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Largest accepted payload in bytes
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: u32,
    /// Bytes requested per socket read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Header byte order; must match the peers
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Disconnect silent clients after this many ms (unset: never)
    pub idle_timeout_ms: Option<u64>,
    /// Close connections sending a kind nobody handles
    #[serde(default)]
    pub close_on_unknown_kind: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_max_payload_size() -> u32 {
    DEFAULT_MAX_PAYLOAD_SIZE
}

fn default_read_chunk_size() -> usize {
    DEFAULT_READ_CHUNK_SIZE
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            backlog: default_backlog(),
            max_payload_size: default_max_payload_size(),
            read_chunk_size: default_read_chunk_size(),
            byte_order: ByteOrder::default(),
            connect_timeout_ms: default_connect_timeout(),
            idle_timeout_ms: None,
            close_on_unknown_kind: false,
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
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("soulwire/config.toml")),
            Some(PathBuf::from("./soulwire.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
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

    /// Build the runtime network settings
    pub fn network_config(&self) -> ConfigResult<network::NetworkConfig> {
        let net = &self.network;
        let mut config = network::NetworkConfig::new(net.port);

        if let Some(addr) = &net.bind_address {
            let ip: IpAddr = addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(addr.clone()))?;
            config = config.with_bind_address(ip);
        }

        config.backlog = net.backlog;
        config.wire = WireFormat::new(net.byte_order, net.max_payload_size);
        config.read_chunk_size = net.read_chunk_size;
        config.connect_timeout = Duration::from_millis(net.connect_timeout_ms);
        config.idle_timeout = net.idle_timeout_ms.map(Duration::from_millis);
        config.close_on_unknown_kind = net.close_on_unknown_kind;

        Ok(config)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            name: "Paper Souls".to_string(),
            verbose: false,
        },
        network: NetworkConfig {
            bind_address: Some("0.0.0.0".to_string()),
            idle_timeout_ms: Some(30_000),
            ..Default::default()
        },
    };

    Ok(toml::to_string_pretty(&config)?)
}

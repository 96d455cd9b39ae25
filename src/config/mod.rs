//! Configuration module
//!
//! Handles loading and saving blockgate configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::NetworkConfig;
use crate::protocol::{
    ServerDescriptor, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_STRING_LENGTH, DEFAULT_PORT,
    PROTOCOL_VERSION, VERSION_NAME,
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

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Listener and player cap
    #[serde(default)]
    pub server: ServerConfig,

    /// Advertised game version
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Hardening limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Sessions allowed at once
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Description shown in the server list
    #[serde(default = "default_motd")]
    pub motd: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_players() -> u32 {
    20
}

fn default_motd() -> String {
    "A blockgate server".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_players: default_max_players(),
            motd: default_motd(),
        }
    }
}

/// Protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Version name shown by clients
    #[serde(default = "default_version_name")]
    pub version_name: String,
    /// Protocol number clients compare against their own
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_version_name() -> String {
    VERSION_NAME.to_string()
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version_name: default_version_name(),
            protocol_version: default_protocol_version(),
        }
    }
}

/// Limits applied to untrusted input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Largest string field in bytes
    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,
    /// Wait for each incoming frame, in ms
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_max_string_length() -> usize {
    DEFAULT_MAX_STRING_LENGTH
}

fn default_read_timeout() -> u64 {
    30_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            max_string_length: default_max_string_length(),
            read_timeout_ms: default_read_timeout(),
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

    /// Reject limits that would leave the server unable to serve anyone
    pub fn validate(&self) -> ConfigResult<()> {
        if self.limits.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.read_timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.limits.max_frame_size == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_frame_size",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("blockgate/config.toml")),
            Some(PathBuf::from("./blockgate.toml")),
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

    /// Facts advertised in the server list
    pub fn descriptor(&self) -> ServerDescriptor {
        ServerDescriptor {
            protocol_version: self.protocol.protocol_version,
            version_name: self.protocol.version_name.clone(),
            max_players: self.server.max_players,
            description: self.server.motd.clone(),
        }
    }

    /// Listener and codec settings
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            max_frame_size: self.limits.max_frame_size,
            max_string_length: self.limits.max_string_length,
            ..NetworkConfig::new(self.server.port)
                .with_bind_address(self.server.bind_address.as_str())
                .with_read_timeout(Duration::from_millis(self.limits.read_timeout_ms))
        }
    }
}

/// Sample configuration written by `config --generate`
pub fn sample_config() -> Config {
    Config {
        server: ServerConfig {
            max_players: 50,
            motd: "Welcome to blockgate".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    Ok(toml::to_string_pretty(&sample_config())?)
}

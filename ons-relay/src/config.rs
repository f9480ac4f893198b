//! Configuration loading for ons-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for ons-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Device directory configuration.
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:9891).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Path the WebSocket endpoint is mounted on (default: /nat).
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Seconds a new connection has to send its first envelope (default: 10).
    #[serde(default = "default_first_message_timeout_secs")]
    pub first_message_timeout_secs: u64,
    /// Outbound frames buffered per connection before writes are dropped
    /// (default: 64).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Largest accepted WebSocket message in bytes (default: 1MB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Device directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Refuse registration of device ids the directory does not know
    /// (default: false).
    #[serde(default)]
    pub verify_devices: bool,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Connection attempts allowed per IP address per minute (default: 30).
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
    /// Envelopes allowed per connection per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Envelopes allowed per second across all connections (default: 2000).
    #[serde(default = "default_global_messages_per_second")]
    pub global_messages_per_second: u32,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:9891".to_string()
}

fn default_ws_path() -> String {
    "/nat".to_string()
}

fn default_first_message_timeout_secs() -> u64 {
    10
}

fn default_outbound_queue() -> usize {
    64
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_database_path() -> PathBuf {
    PathBuf::from("relay.db")
}

fn default_connections_per_minute() -> u32 {
    30
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_messages_per_second() -> u32 {
    2000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ws_path: default_ws_path(),
            first_message_timeout_secs: default_first_message_timeout_secs(),
            outbound_queue: default_outbound_queue(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            verify_devices: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_minute: default_connections_per_minute(),
            messages_per_minute: default_messages_per_minute(),
            global_messages_per_second: default_global_messages_per_second(),
        }
    }
}

impl ServerConfig {
    /// First-message timeout as a [`Duration`].
    pub fn first_message_timeout(&self) -> Duration {
        Duration::from_secs(self.first_message_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

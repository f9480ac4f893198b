//! Configuration loading for ons-device.
//!
//! Configuration is a TOML file with `[connect]`, `[vault]` and `[ice]`
//! tables. Every field is optional. The file is rewritten after a
//! successful registration stores the assigned device id.

use ons_vault::VaultConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for ons-device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Relay connection settings.
    #[serde(default)]
    pub connect: ConnectConfig,
    /// Vault sync settings.
    #[serde(default)]
    pub vault: VaultConfig,
    /// Peer connectivity settings.
    #[serde(default)]
    pub ice: IceConfig,
}

/// Relay connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Relay host and port (default: 127.0.0.1:9891).
    #[serde(default = "default_server")]
    pub server: String,
    /// Id assigned by the directory service; empty until registered.
    #[serde(default)]
    pub device_id: String,
    /// Shared secret clients must present with negotiation envelopes.
    #[serde(default)]
    pub password: String,
    /// Connect as soon as the controller starts (default: false).
    #[serde(default)]
    pub auto: bool,
    /// Use wss/https instead of ws/http (default: false).
    #[serde(default)]
    pub secure: bool,
    /// Relay WebSocket path (default: /nat).
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Seconds between liveness probes (default: 300).
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    /// Seconds to wait for the relay to accept a dial (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Peer connectivity settings handed to the peer-connection backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN server URLs.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

fn default_server() -> String {
    "127.0.0.1:9891".to_string()
}

fn default_ws_path() -> String {
    "/nat".to_string()
}

fn default_liveness_interval_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun.nextcloud.com:443".to_string(),
    ]
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            device_id: String::new(),
            password: String::new(),
            auto: false,
            secure: false,
            ws_path: default_ws_path(),
            liveness_interval_secs: default_liveness_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
        }
    }
}

impl ConnectConfig {
    /// WebSocket URL of the relay endpoint.
    pub fn relay_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.ws_path.starts_with('/') {
            self.ws_path.clone()
        } else {
            format!("/{}", self.ws_path)
        };
        format!("{scheme}://{}{path}", self.server)
    }

    /// Directory service endpoint that assigns device ids.
    pub fn registration_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}/api/nas/register", self.server)
    }

    /// Whether the directory service has assigned this device an id.
    pub fn is_registered(&self) -> bool {
        !self.device_id.is_empty()
    }

    /// Liveness probe interval as a [`Duration`].
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }

    /// Dial timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl DeviceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
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
    /// Failed to write configuration file.
    #[error("failed to write config file {path}: {source}")]
    WriteError {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to serialize the configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

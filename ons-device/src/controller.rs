//! Control surface of a device: register, connect, disconnect, status.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{ConnectConfig, DeviceConfig};
use crate::directory::Registrar;
use crate::error::ControlError;
use crate::negotiator::PeerConnector;
use crate::session::{DeviceSession, SessionSettings};
use crate::transport::Transport;

/// Connection summary returned by [`Controller::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Whether the relay connection is up and registered.
    pub connected: bool,
    /// Assigned device id, empty when unregistered.
    pub device_id: String,
}

/// Ask the directory service for a device id and store it in `connect`.
///
/// Refused when `connect` already carries an id.
pub async fn register_device(
    connect: &mut ConnectConfig,
    registrar: &dyn Registrar,
    name: &str,
    token: &str,
) -> Result<String, ControlError> {
    if connect.is_registered() {
        return Err(ControlError::AlreadyRegistered(connect.device_id.clone()));
    }
    if token.trim().is_empty() {
        return Err(ControlError::MissingToken);
    }

    let id = registrar
        .register(&connect.registration_url(), name, token)
        .await?;
    info!("registered as device {}", id);
    connect.device_id = id.clone();
    Ok(id)
}

/// Owns the device configuration and its session.
pub struct Controller {
    config_path: Option<PathBuf>,
    config: Mutex<DeviceConfig>,
    session: DeviceSession,
    registrar: Arc<dyn Registrar>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config_path", &self.config_path)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Spawn the session and connect right away if `connect.auto` is set
    /// and the device is registered.
    ///
    /// `config_path` is where a successful registration is saved; `None`
    /// keeps the configuration in memory only.
    pub async fn new(
        config_path: Option<PathBuf>,
        config: DeviceConfig,
        transport: Arc<dyn Transport>,
        connector: Arc<dyn PeerConnector>,
        registrar: Arc<dyn Registrar>,
    ) -> Result<Self, ControlError> {
        let session = DeviceSession::spawn(
            transport,
            connector,
            config.ice.clone(),
            config.vault.clone(),
        );
        let auto = config.connect.auto && config.connect.is_registered();
        let controller = Self {
            config_path,
            config: Mutex::new(config),
            session,
            registrar,
        };
        if auto {
            info!("auto-connect enabled");
            controller.connect().await?;
        }
        Ok(controller)
    }

    /// Register under `name` and persist the assigned id.
    pub async fn register(&self, name: &str, token: &str) -> Result<String, ControlError> {
        let mut config = self.config.lock().await;
        let id = register_device(&mut config.connect, self.registrar.as_ref(), name, token).await?;
        if let Some(path) = &self.config_path {
            config.save(path)?;
        }
        Ok(id)
    }

    /// Current connection summary.
    pub async fn status(&self) -> Status {
        let config = self.config.lock().await;
        Status {
            connected: self.session.is_connected(),
            device_id: config.connect.device_id.clone(),
        }
    }

    /// Open the relay session with the stored settings.
    pub async fn connect(&self) -> Result<(), ControlError> {
        let settings = {
            let config = self.config.lock().await;
            if !config.connect.is_registered() {
                return Err(ControlError::NotRegistered);
            }
            SessionSettings::from_config(&config.connect)
        };
        self.session.start(settings).await?;
        Ok(())
    }

    /// Close the relay session. Safe to call when not connected.
    pub async fn disconnect(&self) -> Result<(), ControlError> {
        self.session.stop().await?;
        Ok(())
    }

    /// The underlying session handle.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }
}

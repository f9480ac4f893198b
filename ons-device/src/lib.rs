//! # ons-device
//!
//! Device side of ONS (the NSB).
//!
//! A device keeps one signaling connection to the relay, registered under
//! its device id. When a client sends an offer through the relay, the
//! device answers it, trades ICE candidates, and once the data channel
//! opens hands it to the vault sync engine.
//!
//! ## Layers
//!
//! - [`transport`]: the relay WebSocket behind the [`Transport`] trait
//! - [`negotiator`]: one peer context at a time behind [`PeerConnector`]
//! - [`session`]: the actor that ties both to the `ons-core` state machine
//! - [`controller`]: register, connect, disconnect, status
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ons_device::{Controller, DeviceConfig, HttpRegistrar, MockConnector, WsTransport};
//!
//! let config = DeviceConfig::load_or_default("device.toml".as_ref())?;
//! let transport = Arc::new(WsTransport::new(config.connect.connect_timeout()));
//! let registrar = Arc::new(HttpRegistrar::new(config.connect.connect_timeout())?);
//! let controller = Controller::new(
//!     Some("device.toml".into()),
//!     config,
//!     transport,
//!     Arc::new(MockConnector::new()),
//!     registrar,
//! )
//! .await?;
//! controller.connect().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod negotiator;
pub mod session;
pub mod transport;

pub use config::{ConfigError, ConnectConfig, DeviceConfig, IceConfig};
pub use controller::{register_device, Controller, Status};
pub use directory::{HttpRegistrar, Registrar};
pub use error::{ControlError, NegotiationError, SessionError};
pub use negotiator::{MockConnector, Negotiator, PeerConnector, PeerLink, RtcConnector};
pub use session::{DeviceSession, SessionSettings};
pub use transport::{MockTransport, Transport, TransportError, WsTransport};

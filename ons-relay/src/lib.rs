//! # ons-relay
//!
//! Signaling relay for ONS.
//!
//! Devices behind NAT keep one WebSocket open to the relay and register under
//! their device id; clients connect, name the device they want, and the relay
//! forwards negotiation envelopes between the two until a direct peer link
//! takes over. The relay never interprets negotiation payloads.
//!
//! ## Architecture
//!
//! ```text
//! Client (NSC) ──┐                      ┌── Device (NSB)
//!                │   WebSocket  /nat    │
//!                ├─────────────────────►│
//!                │                      │
//!            ┌───┴──────────────────────┴───┐
//!            │          ons-relay (NSA)     │
//!            │  devices: id -> conn         │
//!            │  clients: device id -> conn  │
//!            │  ┌────────────────────────┐  │
//!            │  │ SQLite device directory│  │
//!            │  └────────────────────────┘  │
//!            └──────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! The first envelope on a connection classifies it:
//! - `register` (data = device id) -> `online` acknowledgement
//! - `connect` (to = device id) -> `connect` acknowledgement
//!
//! Afterwards `p2p-exchange`, `p2p-node` and `p2p-error` envelopes are
//! forwarded by their `to` field. Failures are answered with an `error`
//! envelope carrying a numeric code (see [`ons_types::ErrorCode`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{RelayError, Result};
pub use server::{Presence, RelayMetrics, SignalingRelay};

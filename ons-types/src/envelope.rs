//! Envelope - the JSON wrapper for every signaling message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EnvelopeError, ErrorCode};

/// Event discriminator carried in the `event` field.
///
/// Unknown events are preserved in [`EventKind::Other`] so that relays can
/// reject them explicitly instead of failing to parse the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Device announces itself to the relay
    Register,
    /// Client asks to be paired with a device (also the relay's acknowledgement)
    Connect,
    /// Relay acknowledges a device registration
    Online,
    /// Relay reports an error code
    Error,
    /// Session description (or candidate) exchange
    Exchange,
    /// Single connectivity candidate
    Node,
    /// Negotiation failure reported by a peer
    PeerError,
    /// Anything else
    Other(String),
}

impl EventKind {
    /// Wire string for this event.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Register => "register",
            EventKind::Connect => "connect",
            EventKind::Online => "online",
            EventKind::Error => "error",
            EventKind::Exchange => "p2p-exchange",
            EventKind::Node => "p2p-node",
            EventKind::PeerError => "p2p-error",
            EventKind::Other(s) => s,
        }
    }

    /// Whether the relay forwards this event between paired peers.
    pub fn is_relayed(&self) -> bool {
        matches!(
            self,
            EventKind::Exchange | EventKind::Node | EventKind::PeerError
        )
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "register" => EventKind::Register,
            "connect" => EventKind::Connect,
            "online" => EventKind::Online,
            "error" => EventKind::Error,
            "p2p-exchange" => EventKind::Exchange,
            "p2p-node" => EventKind::Node,
            "p2p-error" => EventKind::PeerError,
            _ => EventKind::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the system sent an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Storage device behind NAT ("NSB")
    Device,
    /// Client application ("NSC")
    Client,
    /// The relay itself ("NSA")
    Relay,
}

impl Role {
    /// Wire tag for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Device => "NSB",
            Role::Client => "NSC",
            Role::Relay => "NSA",
        }
    }

    /// Parse a wire tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "NSB" => Some(Role::Device),
            "NSC" => Some(Role::Client),
            "NSA" => Some(Role::Relay),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling envelope.
///
/// `data` is opaque to the relay; only `event`, `to` and (for devices) the
/// registration id in `data` are ever inspected there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event discriminator
    pub event: EventKind,
    /// Event payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Destination id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Origin role tag ("NSB", "NSC", "NSA")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Shared secret for negotiation envelopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

impl Envelope {
    /// Create an envelope with no payload or routing.
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            data: Value::Null,
            to: None,
            from: None,
            pass: None,
        }
    }

    /// Set the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the destination id.
    pub fn to(mut self, id: impl Into<String>) -> Self {
        self.to = Some(id.into());
        self
    }

    /// Set the origin role.
    pub fn from_role(mut self, role: Role) -> Self {
        self.from = Some(role.as_str().to_string());
        self
    }

    /// Set the shared secret.
    pub fn with_pass(mut self, pass: impl Into<String>) -> Self {
        self.pass = Some(pass.into());
        self
    }

    /// Device registration: `{"event":"register","data":"<id>"}`.
    pub fn register(device_id: &str) -> Self {
        Self::new(EventKind::Register)
            .with_data(Value::String(device_id.to_string()))
            .from_role(Role::Device)
    }

    /// Client pairing request for `device_id`.
    pub fn connect(device_id: &str) -> Self {
        Self::new(EventKind::Connect)
            .to(device_id)
            .from_role(Role::Client)
    }

    /// Relay acknowledgement of a device registration.
    pub fn online() -> Self {
        Self::new(EventKind::Online).from_role(Role::Relay)
    }

    /// Relay acknowledgement of a client pairing request.
    pub fn connect_ack(device_id: &str) -> Self {
        Self::new(EventKind::Connect)
            .with_data(Value::String(format!("connection granted #{device_id}")))
            .to(device_id)
            .from_role(Role::Relay)
    }

    /// Relay error reply carrying a numeric code.
    pub fn error(code: ErrorCode) -> Self {
        Self::new(EventKind::Error)
            .with_data(Value::from(code.code()))
            .from_role(Role::Relay)
    }

    /// Negotiation failure reported by a device.
    pub fn peer_error(to: &str, reason: &str) -> Self {
        Self::new(EventKind::PeerError)
            .with_data(Value::String(reason.to_string()))
            .to(to)
            .from_role(Role::Device)
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(EnvelopeError::Malformed)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Serialization)
    }

    /// Origin role, if `from` carries a known tag.
    pub fn origin_role(&self) -> Option<Role> {
        self.from.as_deref().and_then(Role::parse)
    }

    /// Payload as a string, if it is one.
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    /// Non-empty destination id.
    pub fn destination(&self) -> Option<&str> {
        self.to.as_deref().filter(|s| !s.is_empty())
    }

    /// Target device of a `connect` request: `to`, falling back to a string payload.
    pub fn connect_target(&self) -> Option<&str> {
        self.destination()
            .or_else(|| self.data_str().filter(|s| !s.is_empty()))
    }

    /// Error code of an `error` envelope, numeric or string-encoded.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.event != EventKind::Error {
            return None;
        }
        let raw = match &self.data {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        ErrorCode::from_code(u32::try_from(raw).ok()?)
    }
}

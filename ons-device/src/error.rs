//! Error types for the device side.

use ons_types::{EnvelopeError, SdpType};
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors raised by the relay session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The relay connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An envelope could not be decoded or encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] EnvelopeError),

    /// A negotiation envelope carried the wrong shared secret.
    #[error("password error")]
    Unauthorized,

    /// Negotiation with the client failed.
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// The session task is gone.
    #[error("session closed")]
    Closed,
}

/// Errors raised while negotiating a peer link.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// A description that is not an offer arrived where an offer was expected.
    #[error("expected an offer, got {0:?}")]
    UnexpectedDescription(SdpType),

    /// Too many candidates arrived before any offer.
    #[error("candidate queue full")]
    CandidateQueueFull,

    /// The peer-connection backend failed.
    #[error("peer backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the control API.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The device already has an id.
    #[error("device already registered as {0}")]
    AlreadyRegistered(String),

    /// `connect` was called before `register`.
    #[error("device not registered")]
    NotRegistered,

    /// No bearer token was supplied for registration.
    #[error("missing authorization token")]
    MissingToken,

    /// The directory service could not be reached or answered garbage.
    #[error("directory service unavailable: {0}")]
    Directory(String),

    /// The directory service refused the registration.
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// Loading or saving the configuration failed.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The session could not be reached.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

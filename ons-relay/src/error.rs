//! Error types for ons-relay.

use std::path::PathBuf;

use ons_types::{EnvelopeError, ErrorCode};

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Directory error.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimited(#[from] crate::limits::RateLimitError),

    /// Device id is not known to the directory.
    #[error("unknown device: {id}")]
    UnknownDevice {
        /// The device id that was refused.
        id: String,
    },

    /// No connection is registered under the destination id.
    #[error("destination offline: {id}")]
    UnknownDestination {
        /// The destination id.
        id: String,
    },

    /// The connection's outbound queue is closed or full.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// The numeric code reported to the peer for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Directory(_) => ErrorCode::DirectoryFailure,
            Self::Protocol(ProtocolError::Malformed(_)) => ErrorCode::MalformedEnvelope,
            Self::Protocol(ProtocolError::MissingDeviceId) => ErrorCode::UnparseableFirstMessage,
            Self::Protocol(ProtocolError::UnexpectedFirstEvent { .. }) => {
                ErrorCode::UnknownFirstEvent
            }
            Self::Protocol(ProtocolError::MissingDestination) => ErrorCode::DestinationOffline,
            Self::Protocol(ProtocolError::FirstMessageTimeout { .. }) => {
                ErrorCode::UnparseableFirstMessage
            }
            Self::RateLimited(_) => ErrorCode::RateLimited,
            Self::UnknownDevice { .. } => ErrorCode::UnknownDevice,
            Self::UnknownDestination { .. } => ErrorCode::DestinationOffline,
            Self::Config(_) | Self::Transport(_) | Self::Io(_) => ErrorCode::ConnectionLost,
        }
    }
}

/// Device directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The envelope could not be decoded.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] EnvelopeError),

    /// A `register` envelope without a device id.
    #[error("register envelope carries no device id")]
    MissingDeviceId,

    /// The first envelope was neither `register` nor `connect`.
    #[error("unexpected first event: {event}")]
    UnexpectedFirstEvent {
        /// The event that was received.
        event: String,
    },

    /// A relayed envelope without a `to` field.
    #[error("relayed envelope has no destination")]
    MissingDestination,

    /// No first envelope arrived in time.
    #[error("no first message within {secs}s")]
    FirstMessageTimeout {
        /// The configured timeout.
        secs: u64,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for directory operations.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

//! Error types for ONS wire handling.

use thiserror::Error;

/// Errors raised while decoding or encoding wire messages.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON for the expected shape
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Encoding a message failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A required field was empty or missing
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The payload did not have the shape the event requires
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event the payload belonged to
        event: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Numeric error codes the relay sends in `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Connection upgrade failed
    UpgradeFailed = 10001,
    /// First frame could not be read
    ReadFailed = 10002,
    /// First frame was not a valid envelope
    UnparseableFirstMessage = 10003,
    /// Registering device is not known to the directory
    UnknownDevice = 10004,
    /// First event was neither `register` nor `connect`
    UnknownFirstEvent = 10005,
    /// Connection read loop ended with an error
    ConnectionLost = 10006,
    /// A later frame was not a valid envelope
    MalformedEnvelope = 10007,
    /// Destination id is not currently registered
    DestinationOffline = 10008,
    /// Rate limit exceeded
    RateLimited = 10009,
    /// Device directory lookup failed
    DirectoryFailure = 10010,
}

impl ErrorCode {
    /// The numeric wire value.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Parse a numeric wire value.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            10001 => ErrorCode::UpgradeFailed,
            10002 => ErrorCode::ReadFailed,
            10003 => ErrorCode::UnparseableFirstMessage,
            10004 => ErrorCode::UnknownDevice,
            10005 => ErrorCode::UnknownFirstEvent,
            10006 => ErrorCode::ConnectionLost,
            10007 => ErrorCode::MalformedEnvelope,
            10008 => ErrorCode::DestinationOffline,
            10009 => ErrorCode::RateLimited,
            10010 => ErrorCode::DirectoryFailure,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_known_values() {
        for code in 10001..=10010 {
            let parsed = ErrorCode::from_code(code).unwrap();
            assert_eq!(parsed.code(), code);
        }
        assert!(ErrorCode::from_code(42).is_none());
    }

    #[test]
    fn error_display() {
        let err = EnvelopeError::MissingField("to");
        assert_eq!(err.to_string(), "missing field: to");
        assert_eq!(ErrorCode::DestinationOffline.to_string(), "10008");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EnvelopeError>();
    }
}

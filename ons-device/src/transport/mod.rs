//! Relay connection transport.
//!
//! The session talks to the relay through the [`Transport`] trait, which is
//! connection-oriented and carries text frames:
//! - `connect()` dials the relay URL
//! - `send()` writes one frame
//! - `recv()` blocks for the next frame
//! - `probe()` checks the connection is still answering
//! - `close()` terminates it
//!
//! `recv()` and `send()` may run concurrently: the session's read loop sits
//! in `recv()` while the session itself sends.

mod mock;
mod ws;

pub use mock::MockTransport;
pub use ws::WsTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// A duplex text-frame connection to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dial `url`, replacing any existing connection.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Blocks until a frame arrives or the connection ends.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Actively check that the connection still works.
    async fn probe(&self) -> bool {
        self.is_connected()
    }

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}

//! Per-connection session management.
//!
//! Each accepted connection gets a Session. The first envelope decides the
//! connection's role for its whole lifetime: `register` makes it a device,
//! `connect` makes it a client. Registry entries created by the session are
//! removed when it is dropped, whichever way the connection ends.

use crate::error::{ProtocolError, RelayError, Result};
use crate::registry::PeerHandle;
use crate::server::{RelayMetrics, SignalingRelay};
use futures_util::{Stream, StreamExt};
use ons_types::{Envelope, ErrorCode, EventKind, Role};
use std::sync::Arc;

/// Session state machine states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first envelope.
    AwaitingFirst,
    /// Registered device connection.
    Device {
        /// Id the device registered with.
        id: String,
    },
    /// Client connection.
    Client {
        /// Device this client is currently paired with.
        target: Option<String>,
    },
    /// Session is closing.
    Closing,
}

/// A per-connection session.
pub struct Session {
    relay: Arc<SignalingRelay>,
    handle: PeerHandle,
    state: SessionState,
}

impl Session {
    /// Create a new session for a connection whose writer drains `handle`.
    pub fn new(relay: Arc<SignalingRelay>, handle: PeerHandle) -> Self {
        relay.registry().attach(handle.clone());
        Self {
            relay,
            handle,
            state: SessionState::AwaitingFirst,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the session over the connection's inbound text frames.
    ///
    /// Returns when the stream ends or the session decides to close.
    pub async fn run<S>(mut self, mut frames: S) -> Result<()>
    where
        S: Stream<Item = String> + Unpin,
    {
        let conn_id = self.handle.conn_id();
        let timeout = self.relay.config().server.first_message_timeout();

        let first = match tokio::time::timeout(timeout, frames.next()).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!("conn {} closed before its first message", conn_id);
                return Ok(());
            }
            Err(_) => {
                tracing::warn!("conn {} sent nothing within {:?}", conn_id, timeout);
                RelayMetrics::incr(&self.relay.metrics().errors_total);
                self.handle.close();
                return Err(ProtocolError::FirstMessageTimeout {
                    secs: timeout.as_secs(),
                }
                .into());
            }
        };

        self.on_first(&first).await;

        while self.state != SessionState::Closing {
            let Some(text) = frames.next().await else {
                break;
            };
            self.on_message(&text).await;
        }

        tracing::debug!("conn {} session ended in {:?}", conn_id, self.state);
        Ok(())
    }

    /// Classify the connection from its first envelope.
    async fn on_first(&mut self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    "conn {}: unparseable first message: {}",
                    self.handle.conn_id(),
                    e
                );
                self.reject(ErrorCode::UnparseableFirstMessage);
                return;
            }
        };

        match envelope.event {
            EventKind::Register => {
                let Some(id) = envelope.data_str().filter(|id| !id.is_empty()) else {
                    let err = RelayError::from(ProtocolError::MissingDeviceId);
                    tracing::warn!("conn {}: {}", self.handle.conn_id(), err);
                    self.reject(err.code());
                    return;
                };
                let id = id.to_string();
                match self.relay.device_register(&self.handle, &id).await {
                    Ok(()) => self.state = SessionState::Device { id },
                    Err(e) => {
                        tracing::warn!(
                            "conn {}: registration of {} failed: {}",
                            self.handle.conn_id(),
                            id,
                            e
                        );
                        self.relay.evict_device(&id, self.handle.conn_id());
                        self.reject(e.code());
                    }
                }
            }
            EventKind::Connect => {
                self.state = SessionState::Client { target: None };
                self.dispatch(envelope).await;
            }
            other => {
                let err = RelayError::from(ProtocolError::UnexpectedFirstEvent {
                    event: other.to_string(),
                });
                tracing::warn!("conn {}: {}", self.handle.conn_id(), err);
                self.reject(err.code());
            }
        }
    }

    /// Handle a later envelope on an established connection.
    async fn on_message(&mut self, text: &str) {
        if let Err(e) = self.relay.rate_limits().check_message(self.handle.conn_id()) {
            tracing::warn!("conn {} rate limited: {}", self.handle.conn_id(), e);
            RelayMetrics::incr(&self.relay.metrics().rate_limit_hits);
            let _ = self.handle.send(&Envelope::error(ErrorCode::RateLimited));
            return;
        }

        match Envelope::decode(text) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => {
                tracing::debug!("conn {}: malformed envelope: {}", self.handle.conn_id(), e);
                RelayMetrics::incr(&self.relay.metrics().errors_total);
                let _ = self.handle.send(&Envelope::error(ErrorCode::MalformedEnvelope));
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let result = match &mut self.state {
            SessionState::Device { .. } if envelope.event.is_relayed() => {
                self.relay.relay(Role::Device, &self.handle, envelope)
            }
            SessionState::Device { id } => {
                tracing::debug!("ignoring {} from device {}", envelope.event, id);
                Ok(())
            }
            SessionState::Client { target } => {
                self.relay
                    .handle_client_message(&self.handle, target, envelope)
                    .await
            }
            SessionState::AwaitingFirst | SessionState::Closing => Ok(()),
        };

        match result {
            Ok(()) => {}
            // Already answered with an error envelope
            Err(e @ (RelayError::UnknownDestination { .. } | RelayError::Protocol(_))) => {
                tracing::debug!("conn {}: {}", self.handle.conn_id(), e);
            }
            Err(e) => {
                tracing::warn!("conn {}: {}", self.handle.conn_id(), e);
            }
        }
    }

    /// Send a best-effort error and close.
    fn reject(&mut self, code: ErrorCode) {
        RelayMetrics::incr(&self.relay.metrics().errors_total);
        let _ = self.handle.send(&Envelope::error(code));
        self.handle.close();
        self.state = SessionState::Closing;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let conn_id = self.handle.conn_id();
        self.relay.registry().detach(conn_id);
        match &self.state {
            SessionState::Device { id } => self.relay.evict_device(id, conn_id),
            SessionState::Client {
                target: Some(target),
            } => self.relay.evict_client(target, conn_id),
            _ => {}
        }
    }
}

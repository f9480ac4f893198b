//! Mock transport for testing.
//!
//! Frames queued with [`MockTransport::queue_response`] are handed to
//! `recv()`, which waits while the queue is empty. Dropping the connection
//! wakes any waiting reader with `ConnectionClosed`.

use super::{Transport, TransportError};
use async_trait::async_trait;
use ons_types::Envelope;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Mock relay connection.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_count: usize,
    sent_messages: Vec<String>,
    receive_queue: VecDeque<String>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_probe: bool,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for `recv()`.
    pub fn queue_response(&self, text: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.receive_queue.push_back(text.into());
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Queue an encoded envelope for `recv()`.
    pub fn queue_envelope(&self, envelope: &Envelope) {
        if let Ok(text) = envelope.encode() {
            self.queue_response(text);
        }
    }

    /// Get all frames that were sent.
    pub fn sent_messages(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.clone()
    }

    /// Sent frames decoded as envelopes; undecodable frames are skipped.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent_messages()
            .iter()
            .filter_map(|text| Envelope::decode(text).ok())
            .collect()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.last().cloned()
    }

    /// Get the address that was last connected to.
    pub fn connected_address(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.connected_address.clone()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.connect_count
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Cause the next probe() to report a dead connection.
    pub fn fail_next_probe(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_probe = true;
    }

    /// Simulate the relay dropping the connection.
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.receive_queue.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Clear all state (frames, queue, connection).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
        drop(inner);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(url.to_string());
        inner.connect_count += 1;
        Ok(())
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_messages.push(text);
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        loop {
            // Registered before the check so a concurrent wake is not lost
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.connected {
                    return Err(TransportError::ConnectionClosed);
                }
                if let Some(text) = inner.receive_queue.pop_front() {
                    return Ok(text);
                }
            }
            notified.await;
        }
    }

    fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected
    }

    async fn probe(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if std::mem::take(&mut inner.fail_next_probe) {
            return false;
        }
        inner.connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }
}

//! Live connection registries.
//!
//! Two independent maps keyed by device id: one holding the connection each
//! device registered on, one holding the client connection currently paired
//! with each device. Every accepted connection is also tracked by its id,
//! classified or not, so shutdown can reach connections that lost their
//! registry slot. A [`PeerHandle`] is a cheap clone of the connection's
//! outbound queue, so lookups copy the handle out and release the map shard
//! before anything is written to the network.

use dashmap::DashMap;
use ons_types::Envelope;
use tokio::sync::mpsc;

use crate::error::{RelayError, Result};

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// Close the connection after flushing earlier frames.
    Close,
}

/// Sending half of one connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    conn_id: u64,
    tx: mpsc::Sender<Outbound>,
}

impl PeerHandle {
    /// Wrap the outbound queue of connection `conn_id`.
    pub fn new(conn_id: u64, tx: mpsc::Sender<Outbound>) -> Self {
        Self { conn_id, tx }
    }

    /// Relay-assigned connection id.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Queue an envelope without waiting.
    ///
    /// Fails if the connection is gone or its queue is full; a slow reader
    /// loses frames rather than stalling the sender.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope
            .encode()
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        self.send_text(text)
    }

    /// Queue a raw text frame without waiting.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .try_send(Outbound::Text(text))
            .map_err(|e| RelayError::Transport(format!("conn {}: {e}", self.conn_id)))
    }

    /// Ask the writer to close the connection.
    pub fn close(&self) {
        let _ = self.tx.try_send(Outbound::Close);
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Device and client registries.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    devices: DashMap<String, PeerHandle>,
    clients: DashMap<String, PeerHandle>,
    connections: DashMap<u64, PeerHandle>,
}

impl PeerRegistry {
    /// Create empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a live connection until [`detach`](Self::detach).
    pub fn attach(&self, handle: PeerHandle) {
        self.connections.insert(handle.conn_id, handle);
    }

    /// Stop tracking connection `conn_id`.
    pub fn detach(&self, conn_id: u64) {
        self.connections.remove(&conn_id);
    }

    /// Number of live connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register `handle` as device `id`, returning the connection it replaced.
    pub fn insert_device(&self, id: &str, handle: PeerHandle) -> Option<PeerHandle> {
        self.devices.insert(id.to_string(), handle)
    }

    /// Pair `handle` with device `id`, returning the client it replaced.
    pub fn insert_client(&self, id: &str, handle: PeerHandle) -> Option<PeerHandle> {
        self.clients.insert(id.to_string(), handle)
    }

    /// Handle of the connection registered as device `id`.
    pub fn device(&self, id: &str) -> Option<PeerHandle> {
        self.devices.get(id).map(|entry| entry.value().clone())
    }

    /// Handle of the client paired with device `id`.
    pub fn client(&self, id: &str) -> Option<PeerHandle> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    /// Remove device `id` if connection `conn_id` still owns the entry.
    pub fn evict_device(&self, id: &str, conn_id: u64) -> bool {
        self.devices
            .remove_if(id, |_, handle| handle.conn_id == conn_id)
            .is_some()
    }

    /// Remove the client slot for `id` if connection `conn_id` still owns it.
    pub fn evict_client(&self, id: &str, conn_id: u64) -> bool {
        self.clients
            .remove_if(id, |_, handle| handle.conn_id == conn_id)
            .is_some()
    }

    /// Whether a device connection is registered under `id`.
    pub fn is_device_online(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Whether a client is paired with device `id`.
    pub fn is_client_connected(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of paired clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Every live connection. Used at shutdown.
    pub fn handles(&self) -> Vec<PeerHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(conn_id: u64) -> (PeerHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(4);
        (PeerHandle::new(conn_id, tx), rx)
    }

    #[test]
    fn eviction_only_removes_own_entry() {
        let registry = PeerRegistry::new();
        let (first, _rx1) = handle(1);
        let (second, _rx2) = handle(2);

        registry.insert_device("D1", first);
        let replaced = registry.insert_device("D1", second);
        assert_eq!(replaced.map(|h| h.conn_id()), Some(1));

        // The old connection exiting must not evict the new one
        assert!(!registry.evict_device("D1", 1));
        assert!(registry.is_device_online("D1"));
        assert!(registry.evict_device("D1", 2));
        assert!(!registry.is_device_online("D1"));
    }

    #[test]
    fn registries_are_independent() {
        let registry = PeerRegistry::new();
        let (device, _rx1) = handle(1);
        let (client, _rx2) = handle(2);
        registry.insert_device("D1", device);
        registry.insert_client("D1", client);

        assert_eq!(registry.device("D1").unwrap().conn_id(), 1);
        assert_eq!(registry.client("D1").unwrap().conn_id(), 2);
        assert!(registry.evict_client("D1", 2));
        assert!(registry.is_device_online("D1"));
        assert!(!registry.is_client_connected("D1"));
        assert_eq!(registry.device_count(), 1);
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn handles_cover_connections_without_a_slot() {
        let registry = PeerRegistry::new();
        let (old, _rx1) = handle(1);
        let (new, _rx2) = handle(2);
        registry.attach(old.clone());
        registry.attach(new.clone());
        registry.insert_client("D1", old);
        registry.insert_client("D1", new);

        let mut ids: Vec<u64> = registry.handles().iter().map(|h| h.conn_id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        registry.detach(1);
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn handle_queues_frames_in_order() {
        let (handle, mut rx) = handle(9);
        handle.send(&Envelope::online()).unwrap();
        handle.close();

        match rx.recv().await.unwrap() {
            Outbound::Text(text) => assert!(text.contains("\"online\"")),
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap(), Outbound::Close);
    }

    #[test]
    fn full_queue_is_a_transport_error() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = PeerHandle::new(3, tx);
        handle.send_text("a".into()).unwrap();
        let err = handle.send_text("b".into()).unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[test]
    fn dropped_receiver_closes_handle() {
        let (handle, rx) = handle(4);
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.send(&Envelope::online()).is_err());
    }
}

//! Main SignalingRelay coordination.
//!
//! SignalingRelay owns the device and client registries, the device
//! directory handle, rate limiters and metrics. Sessions call into it to
//! register, pair and relay; nothing here touches a socket directly.

use crate::config::Config;
use crate::directory::DeviceDirectory;
use crate::error::{ProtocolError, RelayError, Result};
use crate::limits::RateLimits;
use crate::registry::{PeerHandle, PeerRegistry};
use ons_types::{Envelope, Role};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted (before the first envelope).
    pub connections_total: AtomicU64,
    /// Total successful device registrations.
    pub registrations_total: AtomicU64,
    /// Total client pairing requests accepted.
    pub pairings_total: AtomicU64,
    /// Total envelopes handed to a destination connection.
    pub envelopes_relayed: AtomicU64,
    /// Total envelopes whose destination was not registered.
    pub relay_misses: AtomicU64,
    /// Total rate limit rejections (connection + message + global).
    pub rate_limit_hits: AtomicU64,
    /// Total protocol errors (malformed envelopes, bad first events, timeouts).
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-id presence as reported by [`SignalingRelay::check_online`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Presence {
    /// A device connection is registered under the id.
    pub device: bool,
    /// A client connection is paired with the id.
    pub client: bool,
}

/// Main relay server.
pub struct SignalingRelay {
    config: Config,
    directory: Arc<dyn DeviceDirectory>,
    registry: PeerRegistry,
    /// Rate limiters for connections and envelopes.
    rate_limits: RateLimits,
    /// Operational metrics (counters).
    metrics: RelayMetrics,
    next_conn_id: AtomicU64,
}

impl std::fmt::Debug for SignalingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("devices", &self.registry.device_count())
            .field("clients", &self.registry.client_count())
            .finish_non_exhaustive()
    }
}

impl SignalingRelay {
    /// Create a relay with the given config and directory.
    pub fn new(config: Config, directory: Arc<dyn DeviceDirectory>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            directory,
            registry: PeerRegistry::new(),
            rate_limits,
            metrics: RelayMetrics::default(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the device directory.
    pub fn directory(&self) -> &Arc<dyn DeviceDirectory> {
        &self.directory
    }

    /// Get the live registries.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Allocate an id for a newly accepted connection.
    pub fn next_connection_id(&self) -> u64 {
        RelayMetrics::incr(&self.metrics.connections_total);
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `conn` as device `id` and acknowledge with `online`.
    ///
    /// With `directory.verify_devices` set, ids the directory does not know
    /// are refused. A previous connection under the same id is replaced and
    /// keeps running until it closes on its own.
    pub async fn device_register(&self, conn: &PeerHandle, id: &str) -> Result<()> {
        if self.config.directory.verify_devices
            && self.directory.get_device_by_device_id(id).await?.is_none()
        {
            return Err(RelayError::UnknownDevice { id: id.to_string() });
        }

        if let Some(previous) = self.registry.insert_device(id, conn.clone()) {
            if previous.conn_id() != conn.conn_id() {
                tracing::info!(
                    "device {} re-registered on conn {} (replacing conn {})",
                    id,
                    conn.conn_id(),
                    previous.conn_id()
                );
            }
        }
        RelayMetrics::incr(&self.metrics.registrations_total);

        match self.directory.update_last_online(id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("device {} not in directory; last-online not recorded", id)
            }
            Err(e) => tracing::warn!("failed to record last-online for {}: {}", id, e),
        }

        tracing::info!(
            "device {} registered on conn {} (devices online: {})",
            id,
            conn.conn_id(),
            self.registry.device_count()
        );
        conn.send(&Envelope::online())
    }

    /// Handle one envelope from a client connection.
    ///
    /// `slot` is the device id this connection is currently paired with; a
    /// `connect` to a different id releases the old pairing first.
    pub async fn handle_client_message(
        &self,
        conn: &PeerHandle,
        slot: &mut Option<String>,
        envelope: Envelope,
    ) -> Result<()> {
        if envelope.event.is_relayed() {
            return self.relay(Role::Client, conn, envelope);
        }

        if envelope.event != ons_types::EventKind::Connect {
            tracing::debug!(
                "ignoring {} from client conn {}",
                envelope.event,
                conn.conn_id()
            );
            return Ok(());
        }

        let Some(target) = envelope.connect_target().map(str::to_string) else {
            let err = RelayError::from(ProtocolError::MissingDestination);
            conn.send(&Envelope::error(err.code()))?;
            return Err(err);
        };

        if let Some(previous) = slot.as_deref() {
            if previous != target {
                self.registry.evict_client(previous, conn.conn_id());
            }
        }
        self.registry.insert_client(&target, conn.clone());
        *slot = Some(target.clone());
        RelayMetrics::incr(&self.metrics.pairings_total);

        if let Err(e) = self.directory.update_last_connect(&target).await {
            tracing::warn!("failed to record last-connect for {}: {}", target, e);
        }

        tracing::info!("client conn {} paired with {}", conn.conn_id(), target);
        conn.send(&Envelope::connect_ack(&target))
    }

    /// Forward `envelope` from a connection of role `origin` to its destination.
    ///
    /// Clients reach devices and devices reach clients; the `from` field of
    /// the envelope is never trusted for this. A missing destination is
    /// reported back to the origin with an error envelope.
    pub fn relay(&self, origin: Role, conn: &PeerHandle, envelope: Envelope) -> Result<()> {
        let Some(to) = envelope.destination().map(str::to_string) else {
            RelayMetrics::incr(&self.metrics.relay_misses);
            let err = RelayError::from(ProtocolError::MissingDestination);
            conn.send(&Envelope::error(err.code()))?;
            return Err(err);
        };

        let destination = match origin {
            Role::Client => self.registry.device(&to),
            Role::Device => self.registry.client(&to),
            Role::Relay => None,
        };

        let Some(destination) = destination else {
            RelayMetrics::incr(&self.metrics.relay_misses);
            let err = RelayError::UnknownDestination { id: to };
            conn.send(&Envelope::error(err.code()))?;
            return Err(err);
        };

        // The shard guard is gone; this only touches the destination's queue
        destination.send(&envelope)?;
        RelayMetrics::incr(&self.metrics.envelopes_relayed);
        tracing::debug!(
            "relayed {} from conn {} to conn {} ({})",
            envelope.event,
            conn.conn_id(),
            destination.conn_id(),
            to
        );
        Ok(())
    }

    /// Presence of each id in the registries.
    pub fn check_online<S: AsRef<str>>(&self, ids: &[S]) -> BTreeMap<String, Presence> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                let presence = Presence {
                    device: self.registry.is_device_online(id),
                    client: self.registry.is_client_connected(id),
                };
                (id.to_string(), presence)
            })
            .collect()
    }

    /// Drop a device registration owned by `conn_id`.
    pub fn evict_device(&self, id: &str, conn_id: u64) {
        if self.registry.evict_device(id, conn_id) {
            tracing::info!(
                "device {} offline (devices online: {})",
                id,
                self.registry.device_count()
            );
        }
    }

    /// Drop a client pairing owned by `conn_id`.
    pub fn evict_client(&self, id: &str, conn_id: u64) {
        if self.registry.evict_client(id, conn_id) {
            tracing::debug!("client conn {} unpaired from {}", conn_id, id);
        }
    }

    /// Ask every live connection to close.
    pub fn shutdown(&self) {
        let handles = self.registry.handles();
        tracing::info!("closing {} connections", handles.len());
        for handle in handles {
            handle.close();
        }
    }
}

//! Prometheus metrics endpoint.

use crate::server::SignalingRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe the registries right now; counters are monotonic since
/// startup.
pub async fn metrics_handler(
    Extension(relay): Extension<Arc<SignalingRelay>>,
) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

fn render(relay: &SignalingRelay) -> String {
    let m = relay.metrics();

    let devices = relay.registry().device_count();
    let clients = relay.registry().client_count();

    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let registrations = m.registrations_total.load(Ordering::Relaxed);
    let pairings = m.pairings_total.load(Ordering::Relaxed);
    let relayed = m.envelopes_relayed.load(Ordering::Relaxed);
    let misses = m.relay_misses.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    format!(
        r#"# HELP ons_relay_devices_online Number of registered device connections
# TYPE ons_relay_devices_online gauge
ons_relay_devices_online {devices}

# HELP ons_relay_clients_paired Number of client connections paired with a device
# TYPE ons_relay_clients_paired gauge
ons_relay_clients_paired {clients}

# HELP ons_relay_info Server information
# TYPE ons_relay_info gauge
ons_relay_info{{version="{version}"}} 1

# HELP ons_relay_connections_total Total connections accepted
# TYPE ons_relay_connections_total counter
ons_relay_connections_total {conns_total}

# HELP ons_relay_registrations_total Total device registrations
# TYPE ons_relay_registrations_total counter
ons_relay_registrations_total {registrations}

# HELP ons_relay_pairings_total Total client pairing requests
# TYPE ons_relay_pairings_total counter
ons_relay_pairings_total {pairings}

# HELP ons_relay_envelopes_relayed_total Total envelopes delivered to a peer
# TYPE ons_relay_envelopes_relayed_total counter
ons_relay_envelopes_relayed_total {relayed}

# HELP ons_relay_relay_misses_total Total envelopes whose destination was offline
# TYPE ons_relay_relay_misses_total counter
ons_relay_relay_misses_total {misses}

# HELP ons_relay_rate_limit_hits_total Total rate limit rejections
# TYPE ons_relay_rate_limit_hits_total counter
ons_relay_rate_limit_hits_total {rate_limits}

# HELP ons_relay_errors_total Total protocol errors
# TYPE ons_relay_errors_total counter
ons_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}

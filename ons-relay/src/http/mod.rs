//! HTTP endpoints for ons-relay.
//!
//! One router serves the WebSocket signaling path next to health, metrics
//! and presence queries.

pub mod health;
mod metrics;
mod online;

use crate::protocol::ws_handler;
use crate::server::SignalingRelay;
use axum::{routing::get, Extension, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use health::HealthStatus;
pub use online::OnlineResponse;

/// Build the router with all endpoints.
pub fn build_router(relay: Arc<SignalingRelay>) -> Router {
    let ws_path = relay.config().server.ws_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/api/online", get(online::online_handler))
        .layer(Extension(relay))
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// Every registered connection is asked to close once shutdown begins.
pub async fn serve<F>(
    relay: Arc<SignalingRelay>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(relay.clone());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        relay.shutdown();
    })
    .await
}

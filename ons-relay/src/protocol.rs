//! WebSocket endpoint.
//!
//! Upgrades HTTP requests on the configured path, splits each socket into a
//! writer task draining the connection's outbound queue and a [`Session`]
//! reading its text frames.

use crate::registry::{Outbound, PeerHandle};
use crate::server::{RelayMetrics, SignalingRelay};
use crate::session::Session;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Upgrade handler for the signaling path.
///
/// Connection attempts are rate limited per remote IP before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(relay): Extension<Arc<SignalingRelay>>,
) -> Response {
    if let Err(e) = relay.rate_limits().check_connection(addr.ip()) {
        tracing::warn!("connection from {} rate limited: {}", addr, e);
        RelayMetrics::incr(&relay.metrics().rate_limit_hits);
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }

    let max_message_size = relay.config().server.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| serve_socket(relay, socket, addr))
}

/// Drive one upgraded socket until either side closes it.
pub async fn serve_socket(relay: Arc<SignalingRelay>, socket: WebSocket, addr: SocketAddr) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel(relay.config().server.outbound_queue.max(1));
    let handle = PeerHandle::new(relay.next_connection_id(), tx);
    let conn_id = handle.conn_id();
    tracing::info!("conn {} accepted from {}", conn_id, addr);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    // Text frames until the peer closes or the socket errors; binary frames
    // are accepted when they carry UTF-8
    let frames = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok(),
                _ => None,
            })
        });

    if let Err(e) = Session::new(relay, handle).run(Box::pin(frames)).await {
        tracing::debug!("conn {} session error: {}", conn_id, e);
    }

    // Every sender clone lives in the registry or the session; both are gone
    // now, so the writer drains what is queued and exits
    let _ = writer.await;
    tracing::info!("conn {} closed", conn_id);
}

//! The only transport: a single persistent WebSocket per client,
//! carrying JSON frames defined by `callrelay-protocol`.
//!
//! This module is the one place that touches an actual socket. It pumps
//! bytes in both directions and owns the heartbeat; everything about
//! *what those bytes mean* lives in `callrelay-core`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router as AxumRouter;
use futures_util::{SinkExt, StreamExt};
use tower_http::trace::TraceLayer;

use callrelay_core::{ConnectionHandle, Router as RelayRouter};

/// Ping interval for the liveness sweep. A connection that misses one
/// full cycle without a pong is reaped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub struct AppState {
    pub router: RelayRouter,
}

pub fn app(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .fallback(banner)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Any path other than `/health` or `/ws`. Platform probes and stray
/// requests get a 200 banner rather than a 404 — there is no routing
/// table to be wrong about here.
async fn banner() -> &'static str {
    "callrelay-server"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (conn, mut outbound_rx) = ConnectionHandle::new();
    let conn_id = conn.id();
    tracing::info!(conn = %conn_id, "connection opened");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // the first tick fires immediately; skip it

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else { break };
                let Ok(json) = serde_json::to_string(&frame) else { continue };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        state.router.handle_frame(&conn, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        state.router.handle_frame(&conn, &data).await;
                    }
                    Some(Ok(Message::Pong(_))) => conn.mark_alive(),
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(error)) => {
                        tracing::debug!(conn = %conn_id, %error, "websocket read error");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if conn.take_alive() {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                } else {
                    tracing::debug!(conn = %conn_id, "heartbeat timeout, reaping connection");
                    break;
                }
            }
            _ = conn.closed() => {
                if let Some(reason) = conn.close_reason() {
                    tracing::debug!(conn = %conn_id, reason, "closing connection");
                }
                break;
            }
        }
    }

    state.router.disconnect(conn_id).await;
    let _ = sink.close().await;
    tracing::info!(conn = %conn_id, "connection closed");
}

//! Call rendezvous server: accepts WebSocket connections, joins them
//! into named rooms, and relays the signaling frames that set up a
//! one-to-one call between two peers in the same room.

mod config;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use callrelay_core::{RoomRegistry, Router};
use config::Config;
use ws::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let state = Arc::new(AppState {
        router: Router::new(RoomRegistry::new()),
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "callrelay-server listening");

    axum::serve(listener, ws::app(state))
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        })
        .await
        .context("server loop failed")?;

    Ok(())
}

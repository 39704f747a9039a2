// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hail dispatch server: platform bootstrap, background tasks, transport.

pub mod config;
pub mod realtime;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hail_core::bus::EventBus;
use hail_core::context::Platform;

use crate::config::ServerConfig;
use crate::realtime::consumer::spawn_notifications_consumer;
use crate::state::Gateway;
use crate::transport::build_router;

/// Run the server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let bus = match config.nats_url {
        Some(ref url) => EventBus::nats(url, &config.nats_prefix).await?,
        None => EventBus::memory(),
    };
    let platform = Platform::new(config.platform(), bus, shutdown.clone());
    let gateway = Gateway::new(Arc::clone(&platform));

    // Background tasks: offer expiry, location history flusher, realtime
    // bridge. All exit on the shutdown token.
    gateway.dispatch.spawn_expiry_sweep();
    gateway.location.spawn_flusher();
    spawn_notifications_consumer(Arc::clone(&platform), Arc::clone(&gateway.rooms)).await?;

    let addr = config.bind_addr();
    let router = build_router(Arc::clone(&gateway));
    let listener = TcpListener::bind(&addr).await?;
    info!("haild listening on {addr}");

    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            serve_shutdown.cancel();
        }
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Stop simulators and push the buffered location tail out before exit.
    shutdown.cancel();
    platform.sim.stop_all().await;
    gateway.location.flush().await;
    info!("haild stopped");
    Ok(())
}

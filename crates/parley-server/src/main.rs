//! # parley-server
//!
//! Publish-only gateway for the Parley network.
//!
//! This binary provides:
//! - a **GossipSub node** (libp2p over QUIC) that publishes channel events
//! - a **REST API** (axum) that confirms messages by assigning ids and
//!   timestamps, relays edits, deletions and typing signals, and accepts
//!   arbitrary schema-validated events

mod api;
mod config;
mod error;

use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use parley_net::{spawn_gossip, GossipConfig, Publisher, TransportNotification};
use parley_shared::SchemaRegistry;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug,parley_net=debug")),
        )
        .init();

    info!("Starting Parley gateway v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Spawn the GossipSub node (runs in background tokio task)
    // -----------------------------------------------------------------------
    let keypair = libp2p::identity::Keypair::generate_ed25519();
    let (transport, mut notifications, peer_id) = spawn_gossip(
        keypair,
        GossipConfig {
            listen_port: config.listen_port,
            dial: config.dial.clone(),
            ..GossipConfig::default()
        },
    )
    .await?;
    info!(peer_id = %peer_id, port = config.listen_port, "GossipSub node running in background");

    // The gateway subscribes to nothing; only connectivity changes arrive.
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match notification {
                TransportNotification::Reconnected => info!("Mesh connectivity restored"),
                TransportNotification::Disconnected => warn!("Lost all mesh peers"),
                TransportNotification::Message(inbound) => {
                    debug!(address = %inbound.address, "Ignoring inbound message")
                }
            }
        }
    });

    let publisher = Publisher::new(
        Arc::new(transport.clone()),
        Arc::new(SchemaRegistry::standard()),
    );
    let http_addr = config.http_addr;
    let app_state = AppState {
        publisher,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                transport.shutdown().await;
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    transport.shutdown().await;
    Ok(())
}

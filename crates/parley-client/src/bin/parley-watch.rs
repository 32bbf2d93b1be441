//! Headless client: joins the GossipSub mesh, follows the configured
//! channels and logs every store change.
//!
//! Env: `PARLEY_USER_ID`, `PARLEY_USER_NAME`, `PARLEY_SERVER_URL`,
//! `PARLEY_LISTEN_PORT`, `PARLEY_DIAL` (comma-separated multiaddrs) and
//! `PARLEY_CHANNELS` (comma-separated `group/channel` pairs).

use std::sync::Arc;

use anyhow::Context;
use libp2p::Multiaddr;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use parley_client::{
    ClientConfig, Collaborators, Directory, HttpRpcClient, Session, StaticIdentity, ViewState,
};
use parley_net::{spawn_gossip, GossipConfig};
use parley_shared::protocol::{Author, ChatChannel, Group};
use parley_shared::{ChannelId, GroupId, SchemaRegistry, UserId};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn directory_from_env(owner: &UserId) -> Directory {
    let mut directory = Directory::new();
    let entries = env_or("PARLEY_CHANNELS", "");

    for pair in entries.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((group_id, channel_id)) = pair.split_once('/') else {
            warn!(value = %pair, "Invalid PARLEY_CHANNELS entry, expected group/channel");
            continue;
        };
        let group_id = GroupId::new(group_id);
        if directory.group(&group_id).is_none() {
            directory.upsert_group(Group {
                id: group_id.clone(),
                name: group_id.to_string(),
                owner_id: owner.clone(),
                image: None,
            });
        }
        directory.upsert_channel(ChatChannel {
            id: ChannelId::new(channel_id),
            group_id,
            name: channel_id.to_string(),
        });
    }
    directory
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_client::init_logging();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let user_id = UserId::new(env_or("PARLEY_USER_ID", "watcher"));
    let author = Author {
        id: user_id.clone(),
        name: env_or("PARLEY_USER_NAME", user_id.as_str()),
        image: None,
    };
    let server_url = env_or("PARLEY_SERVER_URL", "http://127.0.0.1:8080");

    let mut gossip = GossipConfig {
        notification_capacity: config.inbound_capacity,
        ..GossipConfig::default()
    };
    if let Ok(port) = std::env::var("PARLEY_LISTEN_PORT") {
        match port.parse() {
            Ok(port) => gossip.listen_port = port,
            Err(_) => warn!(value = %port, "Invalid PARLEY_LISTEN_PORT, using default"),
        }
    }
    for addr in env_or("PARLEY_DIAL", "").split(',').map(str::trim).filter(|a| !a.is_empty()) {
        match addr.parse::<Multiaddr>() {
            Ok(addr) => gossip.dial.push(addr),
            Err(e) => warn!(value = %addr, error = %e, "Invalid PARLEY_DIAL entry"),
        }
    }

    let keypair = libp2p::identity::Keypair::generate_ed25519();
    let (transport, notifications, peer_id) = spawn_gossip(keypair, gossip)
        .await
        .context("Failed to spawn GossipSub transport")?;
    info!(peer_id = %peer_id, "Transport running");

    let rpc = HttpRpcClient::new(server_url, author).context("Failed to build RPC client")?;
    let view = ViewState::new();
    let mut session = Session::new(
        &config,
        Arc::new(transport.clone()),
        Arc::new(SchemaRegistry::standard()),
        directory_from_env(&user_id),
        Collaborators {
            identity: Arc::new(StaticIdentity(Some(user_id))),
            active: Arc::new(view.clone()),
            navigator: Arc::new(view),
            rpc: Arc::new(rpc),
        },
    );

    let diff = session.start().await;
    info!(subscribed = diff.added.len(), failed = diff.failed.len(), "Session started");

    let store = session.store();
    let mut changes = store
        .lock()
        .map_err(|_| anyhow::anyhow!("Store lock poisoned"))?
        .subscribe_changes();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => info!(channel = %change.channel_id, kind = ?change.kind, "Store changed"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Change log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = session.run(notifications) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }
    transport.shutdown().await;

    Ok(())
}

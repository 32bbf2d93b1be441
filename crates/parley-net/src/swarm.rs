//! GossipSub transport with tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated tokio task. [`GossipTransport`]
//! talks to it through typed commands, each acknowledged over a oneshot
//! channel so that subscribe/publish failures reach the caller. Received
//! GossipSub messages come back as [`TransportNotification`]s.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub::{self, MessageAuthenticity, ValidationMode},
    identify,
    swarm::SwarmEvent,
    Multiaddr, PeerId, SwarmBuilder,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use parley_shared::constants::{
    DEFAULT_QUIC_PORT, GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
use parley_shared::protocol::Envelope;
use parley_shared::{Address, TransportError};

use crate::behaviour::{ParleyBehaviour, ParleyEvent};
use crate::transport::{Inbound, NotificationRx, Transport, TransportNotification};

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

type Reply = oneshot::Sender<Result<(), String>>;

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    /// Dial a remote peer at the given multiaddr.
    Dial(Multiaddr),
    /// Subscribe to a GossipSub topic.
    Subscribe { topic: String, reply: Reply },
    /// Leave a GossipSub topic.
    Unsubscribe { topic: String, reply: Reply },
    /// Publish bytes on a GossipSub topic.
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: Reply,
    },
    /// Gracefully shut down the swarm.
    Shutdown,
}

/// Configuration for spawning the swarm.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Port to listen on (defaults to `DEFAULT_QUIC_PORT`).
    pub listen_port: u16,
    /// Multiaddrs to dial on startup.
    pub dial: Vec<Multiaddr>,
    /// Capacity of the notification channel.
    pub notification_capacity: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            dial: Vec::new(),
            notification_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport handle
// ---------------------------------------------------------------------------

/// [`Transport`] backed by the GossipSub swarm task.
///
/// GossipSub does not deliver a node's own publications back to it, so a
/// node only sees events published by other peers.
#[derive(Debug, Clone)]
pub struct GossipTransport {
    cmd_tx: mpsc::Sender<SwarmCommand>,
}

impl GossipTransport {
    pub async fn dial(&self, addr: Multiaddr) -> Result<(), TransportError> {
        self.cmd_tx
            .send(SwarmCommand::Dial(addr))
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SwarmCommand::Shutdown).await;
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply) -> SwarmCommand,
    ) -> Result<Result<(), String>, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| TransportError::Closed)?;
        reply_rx.await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for GossipTransport {
    async fn subscribe(&self, address: &Address) -> Result<(), TransportError> {
        let topic = address.to_string();
        self.request(|reply| SwarmCommand::Subscribe { topic, reply })
            .await?
            .map_err(|reason| TransportError::Subscribe {
                address: address.to_string(),
                reason,
            })
    }

    async fn unsubscribe(&self, address: &Address) -> Result<(), TransportError> {
        let topic = address.to_string();
        self.request(|reply| SwarmCommand::Unsubscribe { topic, reply })
            .await?
            .map_err(|reason| TransportError::Unsubscribe {
                address: address.to_string(),
                reason,
            })
    }

    async fn publish(&self, address: &Address, envelope: &Envelope) -> Result<(), TransportError> {
        let topic = address.to_string();
        let data = envelope.to_bytes()?;
        self.request(|reply| SwarmCommand::Publish { topic, data, reply })
            .await?
            .map_err(|reason| TransportError::Publish {
                address: address.to_string(),
                reason,
            })
    }
}

// ---------------------------------------------------------------------------
// Swarm construction
// ---------------------------------------------------------------------------

fn build_swarm(keypair: libp2p::identity::Keypair) -> anyhow::Result<libp2p::Swarm<ParleyBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> Result<ParleyBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_MESSAGE_SIZE)
                .build()
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("GossipSub config: {e}").into()
                })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                format!("GossipSub init: {e}").into()
            })?;

            let identify_config =
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_interval(Duration::from_secs(60));

            Ok(ParleyBehaviour {
                gossipsub,
                identify: identify::Behaviour::new(identify_config),
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    Ok(swarm)
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns the transport handle, the notification receiver and the local
/// `PeerId`.
pub async fn spawn_gossip(
    keypair: libp2p::identity::Keypair,
    config: GossipConfig,
) -> anyhow::Result<(GossipTransport, NotificationRx, PeerId)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_addr_v4: Multiaddr =
        format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port).parse()?;
    let listen_addr_v6: Multiaddr =
        format!("/ip6/::/udp/{}/quic-v1", config.listen_port).parse()?;
    swarm.listen_on(listen_addr_v4)?;
    swarm.listen_on(listen_addr_v6)?;

    info!(peer_id = %local_peer_id, port = config.listen_port, "Swarm listening");

    for addr in &config.dial {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial peer");
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<TransportNotification>(config.notification_capacity);

    tokio::spawn(async move {
        let mut connected: HashSet<PeerId> = HashSet::new();
        let mut ever_connected = false;

        loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                error!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(SwarmCommand::Subscribe { topic, reply }) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            let result = swarm
                                .behaviour_mut()
                                .gossipsub
                                .subscribe(&ident)
                                .map(|_| ())
                                .map_err(|e| e.to_string());
                            if let Err(ref e) = result {
                                error!(topic = %topic, error = %e, "Subscribe failed");
                            }
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::Unsubscribe { topic, reply }) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            let outcome = swarm.behaviour_mut().gossipsub.unsubscribe(&ident);
                            debug!(topic = %topic, outcome = ?outcome, "Left topic");
                            let _ = reply.send(Ok(()));
                        }
                        Some(SwarmCommand::Publish { topic, data, reply }) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            let result = swarm
                                .behaviour_mut()
                                .gossipsub
                                .publish(ident, data)
                                .map(|_| ())
                                .map_err(|e| e.to_string());
                            if let Err(ref e) = result {
                                error!(topic = %topic, error = %e, "Publish failed");
                            }
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                // --- Swarm events ---
                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(ParleyEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let inbound = Inbound {
                                address: Address(topic),
                                payload: message.data,
                            };
                            if notif_tx.send(TransportNotification::Message(inbound)).await.is_err() {
                                info!("Notification receiver dropped, shutting down swarm");
                                break;
                            }
                        }

                        SwarmEvent::Behaviour(ParleyEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = ?info.protocol_version,
                                "Identify: received info from peer"
                            );
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let was_empty = connected.is_empty();
                            connected.insert(peer_id);
                            info!(
                                peer = %peer_id,
                                addr = %endpoint.get_remote_address(),
                                "Peer connected"
                            );
                            if was_empty && ever_connected {
                                let _ = notif_tx.send(TransportNotification::Reconnected).await;
                            }
                            ever_connected = true;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 && connected.remove(&peer_id) {
                                info!(peer = %peer_id, "Peer disconnected");
                                if connected.is_empty() {
                                    let _ = notif_tx.send(TransportNotification::Disconnected).await;
                                }
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((GossipTransport { cmd_tx }, notif_rx, local_peer_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_command_channel_reports_closed() {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        drop(cmd_rx);
        let transport = GossipTransport { cmd_tx };

        let err = transport.subscribe(&Address::from("chat:c1")).await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }

    #[tokio::test]
    async fn test_reply_errors_are_mapped_per_operation() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let transport = GossipTransport { cmd_tx };

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if let SwarmCommand::Publish { reply, .. } = cmd {
                    let _ = reply.send(Err("InsufficientPeers".into()));
                }
            }
        });

        let envelope = Envelope::new("typing", serde_json::json!({}));
        let err = transport
            .publish(&Address::from("chat:c1"), &envelope)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Publish { .. }));
    }
}

//! The seam between wire bytes and typed events.
//!
//! A [`Transport`] only moves opaque envelopes between addresses. Inbound
//! traffic is not delivered through callbacks: every transport hands out a
//! single notification receiver at construction time, which keeps delivery
//! for one address in FIFO order and lets the owner drive dispatch from its
//! own loop.

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_shared::protocol::Envelope;
use parley_shared::{Address, TransportError};

/// A raw message received on a subscribed address.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub address: Address,
    pub payload: Vec<u8>,
}

/// Notifications sent *from* a transport to its owner.
#[derive(Debug, Clone)]
pub enum TransportNotification {
    /// A message arrived on an address.
    Message(Inbound),
    /// Connectivity came back after a loss; subscriptions may need re-issuing.
    Reconnected,
    /// Connectivity was lost.
    Disconnected,
}

pub type NotificationRx = mpsc::Receiver<TransportNotification>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, address: &Address) -> Result<(), TransportError>;

    async fn unsubscribe(&self, address: &Address) -> Result<(), TransportError>;

    /// Hand an envelope to the transport. Success means accepted for
    /// delivery, not delivered to every subscriber.
    async fn publish(&self, address: &Address, envelope: &Envelope) -> Result<(), TransportError>;
}

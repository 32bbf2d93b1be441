//! In-process pub/sub hub.
//!
//! Every [`MemoryTransport`] is one connection to a shared [`MemoryHub`].
//! Used by single-process deployments and by tests, which can also inject
//! raw payloads, simulate reconnects and make individual operations fail.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use parley_shared::protocol::Envelope;
use parley_shared::{Address, TransportError};

use crate::transport::{Inbound, NotificationRx, Transport, TransportNotification};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Connection {
    tx: mpsc::Sender<TransportNotification>,
    subscriptions: HashSet<Address>,
    subscribe_calls: HashMap<Address, usize>,
    unsubscribe_calls: HashMap<Address, usize>,
    failing_subscriptions: HashSet<Address>,
    failing_publish: Option<String>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    connections: HashMap<u64, Connection>,
}

/// Shared routing table for all in-process connections.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new connection to the hub.
    pub fn connect(&self) -> (MemoryTransport, NotificationRx) {
        self.connect_with_capacity(DEFAULT_CAPACITY)
    }

    pub fn connect_with_capacity(&self, capacity: usize) -> (MemoryTransport, NotificationRx) {
        let (tx, rx) = mpsc::channel(capacity);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.connections.insert(
            id,
            Connection {
                tx,
                subscriptions: HashSet::new(),
                subscribe_calls: HashMap::new(),
                unsubscribe_calls: HashMap::new(),
                failing_subscriptions: HashSet::new(),
                failing_publish: None,
            },
        );
        debug!(connection = id, "Memory transport connected");

        (
            MemoryTransport {
                id,
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Deliver raw bytes to every connection subscribed to `address`.
    pub async fn inject(&self, address: &Address, payload: Vec<u8>) -> usize {
        let targets: Vec<mpsc::Sender<TransportNotification>> = {
            let inner = self.lock();
            inner
                .connections
                .values()
                .filter(|c| c.subscriptions.contains(address))
                .map(|c| c.tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            let notification = TransportNotification::Message(Inbound {
                address: address.clone(),
                payload: payload.clone(),
            });
            if tx.send(notification).await.is_ok() {
                delivered += 1;
            } else {
                debug!(address = %address, "Receiver gone, skipping delivery");
            }
        }
        delivered
    }

    /// Simulate a connection loss and recovery: subscriptions are forgotten
    /// and every connection is told it reconnected.
    pub async fn reconnect_all(&self) {
        let targets: Vec<mpsc::Sender<TransportNotification>> = {
            let mut inner = self.lock();
            inner
                .connections
                .values_mut()
                .map(|c| {
                    c.subscriptions.clear();
                    c.tx.clone()
                })
                .collect()
        };

        for tx in targets {
            let _ = tx.send(TransportNotification::Disconnected).await;
            let _ = tx.send(TransportNotification::Reconnected).await;
        }
    }
}

/// One connection to a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    id: u64,
    hub: MemoryHub,
}

impl MemoryTransport {
    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> Option<T> {
        let mut inner = self.hub.lock();
        inner.connections.get_mut(&self.id).map(f)
    }

    /// Make every subscribe to `address` fail until cleared.
    pub fn fail_subscriptions_to(&self, address: &Address, fail: bool) {
        self.with_connection(|c| {
            if fail {
                c.failing_subscriptions.insert(address.clone());
            } else {
                c.failing_subscriptions.remove(address);
            }
        });
    }

    /// Make every publish fail with `reason` (or succeed again with `None`).
    pub fn fail_publishes(&self, reason: Option<String>) {
        self.with_connection(|c| c.failing_publish = reason);
    }

    pub fn subscribe_calls(&self, address: &Address) -> usize {
        self.with_connection(|c| c.subscribe_calls.get(address).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn unsubscribe_calls(&self, address: &Address) -> usize {
        self.with_connection(|c| c.unsubscribe_calls.get(address).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn subscriptions(&self) -> BTreeSet<Address> {
        self.with_connection(|c| c.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.hub.lock().connections.remove(&self.id);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, address: &Address) -> Result<(), TransportError> {
        self.with_connection(|c| {
            *c.subscribe_calls.entry(address.clone()).or_insert(0) += 1;
            if c.failing_subscriptions.contains(address) {
                return Err(TransportError::Subscribe {
                    address: address.to_string(),
                    reason: "address unreachable".to_string(),
                });
            }
            c.subscriptions.insert(address.clone());
            Ok(())
        })
        .unwrap_or(Err(TransportError::Closed))
    }

    async fn unsubscribe(&self, address: &Address) -> Result<(), TransportError> {
        self.with_connection(|c| {
            *c.unsubscribe_calls.entry(address.clone()).or_insert(0) += 1;
            c.subscriptions.remove(address);
        })
        .ok_or(TransportError::Closed)
    }

    async fn publish(&self, address: &Address, envelope: &Envelope) -> Result<(), TransportError> {
        let failing = self
            .with_connection(|c| c.failing_publish.clone())
            .ok_or(TransportError::Closed)?;
        if let Some(reason) = failing {
            return Err(TransportError::Publish {
                address: address.to_string(),
                reason,
            });
        }

        let payload = envelope.to_bytes()?;
        let delivered = self.hub.inject(address, payload).await;
        debug!(address = %address, event = %envelope.name, delivered, "Published envelope");
        Ok(())
    }
}

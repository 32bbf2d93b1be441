//! Incremental subscription management and inbound dispatch.
//!
//! The [`Subscriber`] owns a stable handler object and a desired address
//! set. Updating the set only issues the subscribe/unsubscribe calls for the
//! difference, so addresses present before and after a change keep their
//! transport subscription and lose no events.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_shared::protocol::Envelope;
use parley_shared::{Address, ChannelEvent, SchemaRegistry, TransportError};

use crate::transport::{Inbound, Transport};

/// Receives every decoded event, in per-address delivery order.
pub trait EventHandler: Send {
    fn on_event(&mut self, address: &Address, event: ChannelEvent);
}

/// Outcome of one [`Subscriber::update_subscriptions`] call.
#[derive(Debug, Default)]
pub struct SubscriptionDiff {
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
    /// Addresses that stayed desired but could not be subscribed. They are
    /// retried on the next reconnect.
    pub failed: Vec<(Address, TransportError)>,
}

pub struct Subscriber<H> {
    transport: Arc<dyn Transport>,
    registry: Arc<SchemaRegistry>,
    handler: H,
    /// What the owner asked for.
    desired: BTreeSet<Address>,
    /// What the transport confirmed.
    active: BTreeSet<Address>,
}

impl<H: EventHandler> Subscriber<H> {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<SchemaRegistry>, handler: H) -> Self {
        Self {
            transport,
            registry,
            handler,
            desired: BTreeSet::new(),
            active: BTreeSet::new(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn desired(&self) -> &BTreeSet<Address> {
        &self.desired
    }

    pub fn active(&self) -> &BTreeSet<Address> {
        &self.active
    }

    /// Converge the transport subscriptions to exactly `addresses`.
    pub async fn update_subscriptions(&mut self, addresses: BTreeSet<Address>) -> SubscriptionDiff {
        let mut diff = SubscriptionDiff::default();

        let to_remove: Vec<Address> = self
            .desired
            .union(&self.active)
            .filter(|a| !addresses.contains(*a))
            .cloned()
            .collect();
        let to_add: Vec<Address> = addresses
            .iter()
            .filter(|a| !self.active.contains(*a))
            .cloned()
            .collect();

        // Stop forwarding before the transport call returns.
        self.desired = addresses;

        for address in to_remove {
            let was_active = self.active.remove(&address);
            if was_active {
                if let Err(e) = self.transport.unsubscribe(&address).await {
                    warn!(address = %address, error = %e, "Unsubscribe failed");
                }
            }
            debug!(address = %address, "Unsubscribed");
            diff.removed.push(address);
        }

        for address in to_add {
            match self.transport.subscribe(&address).await {
                Ok(()) => {
                    debug!(address = %address, "Subscribed");
                    self.active.insert(address.clone());
                    diff.added.push(address);
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Subscribe failed");
                    diff.failed.push((address, e));
                }
            }
        }

        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            failed = diff.failed.len(),
            total = self.active.len(),
            "Subscriptions updated"
        );
        diff
    }

    /// Re-issue every desired subscription, after the transport reconnected.
    pub async fn resync(&mut self) -> SubscriptionDiff {
        self.active.clear();
        let desired = std::mem::take(&mut self.desired);
        self.update_subscriptions(desired).await
    }

    /// Decode one inbound message and forward it to the handler.
    ///
    /// Returns `false` when the message was dropped (unsubscribed address or
    /// malformed payload). Drops are logged, never propagated.
    pub fn dispatch(&mut self, inbound: Inbound) -> bool {
        if !self.desired.contains(&inbound.address) {
            debug!(address = %inbound.address, "Dropping message for unsubscribed address");
            return false;
        }

        let envelope = match Envelope::from_bytes(&inbound.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    address = %inbound.address,
                    len = inbound.payload.len(),
                    error = %e,
                    "Dropping undecodable envelope"
                );
                return false;
            }
        };

        let name = envelope.name.clone();
        match self.registry.decode_inbound(&inbound.address, envelope) {
            Ok(event) => {
                debug!(address = %inbound.address, event = %name, "Dispatching event");
                self.handler.on_event(&inbound.address, event);
                true
            }
            Err(e) => {
                warn!(address = %inbound.address, event = %name, error = %e, "Dropping invalid event");
                false
            }
        }
    }
}

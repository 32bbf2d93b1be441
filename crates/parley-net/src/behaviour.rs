//! Composed libp2p `NetworkBehaviour` for Parley nodes.
//!
//! GossipSub carries channel envelopes (one topic per channel address);
//! Identify advertises the protocol version to connecting peers.

use libp2p::{gossipsub, identify, swarm::NetworkBehaviour};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "ParleyEvent")]
pub struct ParleyBehaviour {
    /// Pub/sub messaging, one topic per channel address
    pub gossipsub: gossipsub::Behaviour,
    /// Protocol identification and capability advertisement
    pub identify: identify::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum ParleyEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for ParleyEvent {
    fn from(event: gossipsub::Event) -> Self {
        ParleyEvent::Gossipsub(event)
    }
}

impl From<identify::Event> for ParleyEvent {
    fn from(event: identify::Event) -> Self {
        ParleyEvent::Identify(event)
    }
}

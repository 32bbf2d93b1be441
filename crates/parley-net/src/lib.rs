// Realtime transport layer: typed publish and incremental subscription over
// a pluggable pub/sub transport (in-process hub or libp2p GossipSub).

pub mod behaviour;
pub mod memory;
pub mod publisher;
pub mod subscriber;
pub mod swarm;
pub mod transport;

pub use behaviour::{ParleyBehaviour, ParleyEvent};
pub use memory::{MemoryHub, MemoryTransport};
pub use publisher::Publisher;
pub use subscriber::{EventHandler, Subscriber, SubscriptionDiff};
pub use swarm::{spawn_gossip, GossipConfig, GossipTransport, SwarmCommand};
pub use transport::{Inbound, NotificationRx, Transport, TransportNotification};

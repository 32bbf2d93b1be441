/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/parley/1.0.0";

/// Separator between the namespace name and each address argument
pub const ADDRESS_SEPARATOR: char = ':';

/// Private per-user namespace
pub const NS_USER: &str = "user";

/// Per-group namespace
pub const NS_GROUP: &str = "group";

/// Per-chat-thread namespace (group text channels and DMs)
pub const NS_CHAT: &str = "chat";

/// Typing entries older than this are stale
pub const DEFAULT_TYPING_TTL_SECS: u64 = 10;

/// Maximum chat message length in characters
pub const MAX_CONTENT_LEN: usize = 2000;

/// Maximum envelope size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4001;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

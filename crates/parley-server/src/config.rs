//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the gateway can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use libp2p::Multiaddr;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_QUIC_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP port for the QUIC GossipSub listener.
    /// Env: `LISTEN_PORT`
    /// Default: `4001`
    pub listen_port: u16,

    /// Peers to dial at startup.
    /// Env: `DIAL_ADDRS` (comma-separated multiaddrs)
    /// Default: none
    pub dial: Vec<Multiaddr>,

    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Human-readable name for this gateway instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley Gateway"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            dial: Vec::new(),
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: "Parley Gateway".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = lookup("LISTEN_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.listen_port = parsed;
            } else {
                tracing::warn!(value = %port, "Invalid LISTEN_PORT, using default");
            }
        }

        if let Some(addrs) = lookup("DIAL_ADDRS") {
            for addr in addrs.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                match addr.parse::<Multiaddr>() {
                    Ok(parsed) => config.dial.push(parsed),
                    Err(e) => tracing::warn!(value = %addr, error = %e, "Invalid DIAL_ADDRS entry, skipping"),
                }
            }
        }

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

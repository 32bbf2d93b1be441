//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so an embedding application can start a
//! session with zero configuration.

use std::time::Duration;

use parley_shared::constants::DEFAULT_TYPING_TTL_SECS;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a typing signal stays visible.
    /// Env: `PARLEY_TYPING_TTL_SECS`
    /// Default: `10`
    pub typing_ttl: Duration,

    /// Bound of the transport notification queue.
    /// Env: `PARLEY_INBOUND_CAPACITY`
    /// Default: `256`
    pub inbound_capacity: usize,

    /// How many store changes a slow observer may lag behind.
    /// Env: `PARLEY_CHANGE_CAPACITY`
    /// Default: `1024`
    pub change_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_secs(DEFAULT_TYPING_TTL_SECS),
            inbound_capacity: 256,
            change_capacity: 1024,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("PARLEY_TYPING_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.typing_ttl = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PARLEY_TYPING_TTL_SECS, using default"),
            }
        }

        if let Some(val) = lookup("PARLEY_INBOUND_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.inbound_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid PARLEY_INBOUND_CAPACITY, using default"),
            }
        }

        if let Some(val) = lookup("PARLEY_CHANGE_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.change_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid PARLEY_CHANGE_CAPACITY, using default"),
            }
        }

        config
    }
}

use thiserror::Error;

use parley_shared::{ChannelId, Nonce};

/// Errors produced by the store layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No pending message with this nonce in the channel. It may already
    /// have been confirmed.
    #[error("No pending message {nonce} in channel {channel_id}")]
    PendingNotFound { channel_id: ChannelId, nonce: Nonce },

    /// The requested pending-state transition does not exist.
    #[error("Pending message {nonce} cannot go from {from} to {to}")]
    InvalidTransition {
        nonce: Nonce,
        from: &'static str,
        to: &'static str,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

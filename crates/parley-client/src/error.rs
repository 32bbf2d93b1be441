use thiserror::Error;

use parley_shared::{Nonce, ParleyError};
use parley_store::StoreError;

/// Failure reported by the non-realtime RPC layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RpcError(pub String);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Parley(#[from] ParleyError),

    /// The send failed; the pending message is now errored.
    #[error("Sending message {nonce} failed: {reason}")]
    SendFailed { nonce: Nonce, reason: String },
}

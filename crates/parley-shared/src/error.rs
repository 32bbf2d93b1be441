use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Local validation failures. Always raised before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Namespace already defined: {0}")]
    DuplicateNamespace(String),

    #[error("Unknown event `{event}` in namespace `{namespace}`")]
    UnknownEvent { namespace: String, event: String },

    #[error("Invalid payload for `{namespace}/{event}`: {reason}")]
    InvalidPayload {
        namespace: String,
        event: String,
        reason: String,
    },

    #[error("Namespace `{namespace}` expects {expected} argument(s), got {actual}")]
    Arity {
        namespace: String,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Subscribe to {address} failed: {reason}")]
    Subscribe { address: String, reason: String },

    #[error("Unsubscribe from {address} failed: {reason}")]
    Unsubscribe { address: String, reason: String },

    #[error("Publish to {address} failed: {reason}")]
    Publish { address: String, reason: String },

    #[error("Encoding error: {0}")]
    Encoding(String),
}

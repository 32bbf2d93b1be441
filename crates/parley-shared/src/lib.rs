//! # parley-shared
//!
//! Types shared by every Parley crate: identifiers, the error taxonomy,
//! event payloads and the channel namespace schemas that turn a
//! `(namespace, args)` pair into a subscribable address.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod types;

pub use error::{ParleyError, SchemaError, TransportError};
pub use schema::{ChannelEvent, Namespace, SchemaRegistry};
pub use types::{Address, ChannelId, GroupId, MessageId, Nonce, UserId};

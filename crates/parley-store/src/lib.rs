//! # parley-store
//!
//! Client-side state for the Parley chat client: confirmed messages,
//! optimistic pending messages, typing indicators and unread counters, kept
//! per channel.  The crate exposes a synchronous [`LocalStore`] owned by one
//! session; every mutation goes through a typed operation and is announced
//! on a broadcast channel so views can re-render.

pub mod messages;
pub mod models;
pub mod pending;
pub mod store;
pub mod typing;
pub mod unread;

mod error;

pub use error::StoreError;
pub use models::*;
pub use store::{shared, LocalStore, SharedStore};

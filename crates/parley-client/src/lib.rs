//! # parley-client
//!
//! Client core for Parley: keeps a session's local store consistent with
//! realtime channel events. It derives the subscription set from the user's
//! membership, reconciles confirmations with optimistic sends, and maintains
//! unread counters and typing indicators.

pub mod collaborators;
pub mod config;
pub mod directory;
pub mod error;
pub mod reconcile;
pub mod rpc;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use collaborators::{
    ActiveView, IdentityProvider, Navigator, RpcClient, SendMessageRequest, StaticIdentity,
    ViewState, ViewTarget,
};
pub use config::ClientConfig;
pub use directory::Directory;
pub use error::{ClientError, RpcError};
pub use reconcile::{Reconciler, SessionEffect};
pub use rpc::HttpRpcClient;
pub use session::{Collaborators, MessageSender, Session, UnreadSummary};

/// Install the tracing subscriber. Respects `RUST_LOG`; a second call is a
/// no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley_client=debug,parley_net=debug,parley_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

//! Capabilities the client core consumes from the rest of the application.
//!
//! Each one is a narrow trait injected at construction; nothing here is read
//! from ambient state.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use parley_shared::{ChannelId, GroupId, MessageId, Nonce, UserId};

use crate::error::RpcError;

/// Who is logged in.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// What the user is looking at.
pub trait ActiveView: Send + Sync {
    fn active_channel_id(&self) -> Option<ChannelId>;

    fn active_group_id(&self) -> Option<GroupId> {
        None
    }
}

/// Something the active view pointed at, now gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewTarget {
    Group(GroupId),
    Channel(ChannelId),
}

/// Routing: leave a view whose target disappeared.
pub trait Navigator: Send + Sync {
    fn navigate_away(&self, from: &ViewTarget);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendMessageRequest {
    pub channel_id: ChannelId,
    pub content: String,
    pub nonce: Nonce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

/// The request/response layer. A successful send is confirmed later by a
/// `message_sent` event, not by the return value.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn send_message(&self, request: SendMessageRequest) -> Result<(), RpcError>;

    async fn acknowledge_read(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), RpcError>;
}

// ---------------------------------------------------------------------------
// Simple implementations
// ---------------------------------------------------------------------------

/// Fixed identity for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Option<UserId>);

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.0.clone()
    }
}

#[derive(Debug, Default)]
struct ViewInner {
    group: Option<GroupId>,
    channel: Option<ChannelId>,
}

/// Active view shared with the routing layer, which updates it as the user
/// navigates.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    inner: Arc<RwLock<ViewInner>>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, group: Option<GroupId>, channel: Option<ChannelId>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.group = group;
        inner.channel = channel;
    }

    pub fn close(&self) {
        self.open(None, None);
    }
}

impl ActiveView for ViewState {
    fn active_channel_id(&self) -> Option<ChannelId> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .channel
            .clone()
    }

    fn active_group_id(&self) -> Option<GroupId> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .group
            .clone()
    }
}

impl Navigator for ViewState {
    /// Without a router, leaving a view just clears it.
    fn navigate_away(&self, from: &ViewTarget) {
        tracing::info!(target_view = ?from, "Active view removed, closing it");
        self.close();
    }
}

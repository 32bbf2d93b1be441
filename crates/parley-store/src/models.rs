use chrono::{DateTime, Utc};

use parley_shared::protocol::Author;
use parley_shared::{ChannelId, MessageId, Nonce};

pub use parley_shared::protocol::Message;

/// Lifecycle of an optimistic send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingState {
    /// Waiting for the server confirmation.
    Sending,
    /// The send failed; kept visible for retry or dismissal.
    Errored(String),
}

impl PendingState {
    pub fn label(&self) -> &'static str {
        match self {
            PendingState::Sending => "sending",
            PendingState::Errored(_) => "errored",
        }
    }
}

/// A locally-visible message not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub nonce: Nonce,
    pub channel_id: ChannelId,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub sent_at: DateTime<Utc>,
    pub state: PendingState,
}

impl PendingMessage {
    pub fn is_errored(&self) -> bool {
        matches!(self.state, PendingState::Errored(_))
    }
}

/// Last "typing" signal from one user in one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub user: Author,
    pub at: DateTime<Utc>,
}

/// Unread bookkeeping for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadState {
    pub unread: u32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_read_message: Option<MessageId>,
}

/// Result of applying a confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The message was new and has been appended. Carries the nonce of the
    /// pending entry it replaced, if any.
    Appended { matched: Option<Nonce> },
    /// A message with the same id was already present.
    Duplicate,
}

/// Which part of a channel's state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Messages,
    Pending,
    Typing,
    Unread,
    Removed,
}

/// Broadcast to observers after each mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub channel_id: ChannelId,
    pub kind: ChangeKind,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_CONTENT_LEN;
use crate::error::TransportError;
use crate::types::{ChannelId, GroupId, MessageId, Nonce, UserId};

/// What actually travels over the transport: `{"name": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Public profile of a message author or typing user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A server-confirmed chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    /// Absent for system messages.
    #[serde(default)]
    pub author: Option<Author>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    /// Echoed back only to the session that sent it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Nonce>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn author_id(&self) -> Option<&UserId> {
        self.author.as_ref().map(|a| &a.id)
    }
}

/// Partial edit of a message. Absent fields stay unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: MessageId,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub channel_id: ChannelId,
    pub user: Author,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A text channel inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChannel {
    pub id: ChannelId,
    pub group_id: GroupId,
    pub name: String,
}

/// A direct-message channel between users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmChannel {
    pub id: ChannelId,
    pub members: Vec<Author>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub group_id: GroupId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChannelRef {
    pub group_id: GroupId,
    pub channel_id: ChannelId,
}

// ---------------------------------------------------------------------------
// Events, one closed enum per namespace
// ---------------------------------------------------------------------------

/// Events on a user's private channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum UserEvent {
    GroupCreated(Group),
    GroupUpdated(Group),
    GroupRemoved(GroupRef),
    DmCreated(DmChannel),
    DmUpdated(DmChannel),
    DmRemoved(ChannelRef),
}

/// Events on a group channel, seen by every member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum GroupEvent {
    GroupUpdated(Group),
    GroupDeleted(GroupRef),
    ChannelCreated(ChatChannel),
    ChannelUpdated(ChatChannel),
    ChannelDeleted(GroupChannelRef),
}

/// Events on a single chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageSent(Message),
    MessageUpdated(MessageUpdate),
    MessageDeleted(MessageRef),
    Typing(TypingSignal),
}

// ---------------------------------------------------------------------------
// Field checks beyond what serde enforces
// ---------------------------------------------------------------------------

pub(crate) fn check_id(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

pub(crate) fn check_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }
    let len = content.chars().count();
    if len > MAX_CONTENT_LEN {
        return Err(format!(
            "content is {len} characters (max {MAX_CONTENT_LEN})"
        ));
    }
    Ok(())
}

impl Author {
    pub(crate) fn check(&self) -> Result<(), String> {
        check_id("user id", self.id.as_str())
    }
}

impl Message {
    pub(crate) fn check(&self) -> Result<(), String> {
        check_id("message id", self.id.as_str())?;
        check_id("channel id", self.channel_id.as_str())?;
        if let Some(author) = &self.author {
            author.check()?;
        }
        check_content(&self.content)
    }
}

impl MessageUpdate {
    pub(crate) fn check(&self) -> Result<(), String> {
        check_id("message id", self.id.as_str())?;
        check_id("channel id", self.channel_id.as_str())?;
        match &self.content {
            Some(content) => check_content(content),
            None => Ok(()),
        }
    }
}

impl Group {
    pub(crate) fn check(&self) -> Result<(), String> {
        check_id("group id", self.id.as_str())?;
        check_id("owner id", self.owner_id.as_str())
    }
}

impl ChatChannel {
    pub(crate) fn check(&self) -> Result<(), String> {
        check_id("channel id", self.id.as_str())?;
        check_id("group id", self.group_id.as_str())
    }
}

impl DmChannel {
    pub(crate) fn check(&self) -> Result<(), String> {
        check_id("channel id", self.id.as_str())?;
        self.members.iter().try_for_each(Author::check)
    }
}

use tracing::debug;

use parley_shared::protocol::MessageUpdate;
use parley_shared::{ChannelId, MessageId};

use crate::models::{ChangeKind, Confirmation, Message};
use crate::store::LocalStore;

impl LocalStore {
    /// Snapshot of a channel's confirmed messages, oldest first.
    pub fn messages(&self, channel_id: &ChannelId) -> Vec<Message> {
        self.channel(channel_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn message(&self, channel_id: &ChannelId, id: &MessageId) -> Option<Message> {
        self.channel(channel_id)?
            .messages
            .iter()
            .find(|m| &m.id == id)
            .cloned()
    }

    pub fn last_message(&self, channel_id: &ChannelId) -> Option<Message> {
        self.channel(channel_id)?.messages.last().cloned()
    }

    /// Apply a server-confirmed message.
    ///
    /// With `match_nonce`, removes the pending entry carrying the same nonce
    /// and appends the message in one step. Only the sender's own
    /// confirmations may match: nonces of other authors mean nothing here.
    /// A message whose id is already present is not appended again, but
    /// still clears a matching pending entry.
    pub fn confirm_message(&mut self, message: Message, match_nonce: bool) -> Confirmation {
        let channel_id = message.channel_id.clone();
        let channel = self.channel_mut(&channel_id);

        let matched = message.nonce.filter(|_| match_nonce).and_then(|nonce| {
            let idx = channel.pending.iter().position(|p| p.nonce == nonce)?;
            channel.pending.remove(idx);
            Some(nonce)
        });

        let duplicate = channel.messages.iter().any(|m| m.id == message.id);
        if !duplicate {
            channel.messages.push(message);
        }

        if matched.is_some() {
            self.notify(&channel_id, ChangeKind::Pending);
        }
        if duplicate {
            debug!(channel = %channel_id, "Ignoring duplicate confirmation");
            return Confirmation::Duplicate;
        }
        self.notify(&channel_id, ChangeKind::Messages);
        Confirmation::Appended { matched }
    }

    /// Merge an edit into a loaded message. Returns `false` when the message
    /// is not loaded.
    pub fn update_message(&mut self, update: &MessageUpdate) -> bool {
        let Some(channel) = self.channels.get_mut(&update.channel_id) else {
            return false;
        };
        let Some(message) = channel.messages.iter_mut().find(|m| m.id == update.id) else {
            return false;
        };

        if let Some(content) = &update.content {
            message.content = content.clone();
        }
        if update.edited_at.is_some() {
            message.edited_at = update.edited_at;
        }
        self.notify(&update.channel_id, ChangeKind::Messages);
        true
    }

    /// Remove a message by id. Returns `false` when it was not loaded.
    pub fn delete_message(&mut self, channel_id: &ChannelId, id: &MessageId) -> bool {
        let Some(channel) = self.channels.get_mut(channel_id) else {
            return false;
        };
        let before = channel.messages.len();
        channel.messages.retain(|m| &m.id != id);
        let removed = channel.messages.len() != before;
        if removed {
            self.notify(channel_id, ChangeKind::Messages);
        }
        removed
    }

    /// Prepend an older page fetched over RPC, skipping ids already loaded.
    pub fn extend_history(&mut self, channel_id: &ChannelId, older: Vec<Message>) -> usize {
        let channel = self.channel_mut(channel_id);
        let mut fresh: Vec<Message> = older
            .into_iter()
            .filter(|m| !channel.messages.iter().any(|known| known.id == m.id))
            .collect();
        let added = fresh.len();
        if added > 0 {
            fresh.append(&mut channel.messages);
            channel.messages = fresh;
            self.notify(channel_id, ChangeKind::Messages);
        }
        added
    }
}

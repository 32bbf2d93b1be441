use chrono::{DateTime, Utc};

use parley_shared::protocol::Author;
use parley_shared::{ChannelId, UserId};

use crate::models::{ChangeKind, TypingEntry};
use crate::store::LocalStore;

impl LocalStore {
    /// Record a typing signal, replacing the user's previous entry.
    pub fn upsert_typing(&mut self, channel_id: &ChannelId, user: Author, at: DateTime<Utc>) {
        let channel = self.channel_mut(channel_id);
        match channel.typing.iter_mut().find(|t| t.user.id == user.id) {
            Some(entry) => {
                entry.user = user;
                entry.at = entry.at.max(at);
            }
            None => channel.typing.push(TypingEntry { user, at }),
        }
        self.notify(channel_id, ChangeKind::Typing);
    }

    /// Users typing in a channel as of `now`. Stale entries are filtered out
    /// even if never pruned.
    pub fn typing(&self, channel_id: &ChannelId, now: DateTime<Utc>) -> Vec<TypingEntry> {
        let cutoff = now - self.typing_ttl;
        self.channel(channel_id)
            .map(|c| {
                c.typing
                    .iter()
                    .filter(|t| t.at > cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove a user's entry, e.g. once their message arrived.
    pub fn clear_typing(&mut self, channel_id: &ChannelId, user_id: &UserId) -> bool {
        let Some(channel) = self.channels.get_mut(channel_id) else {
            return false;
        };
        let before = channel.typing.len();
        channel.typing.retain(|t| &t.user.id != user_id);
        let removed = channel.typing.len() != before;
        if removed {
            self.notify(channel_id, ChangeKind::Typing);
        }
        removed
    }

    /// Evict stale entries from every channel. Returns how many went.
    pub fn prune_typing(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.typing_ttl;
        let mut touched = Vec::new();
        let mut evicted = 0;

        for (channel_id, channel) in self.channels.iter_mut() {
            let before = channel.typing.len();
            channel.typing.retain(|t| t.at > cutoff);
            if channel.typing.len() != before {
                evicted += before - channel.typing.len();
                touched.push(channel_id.clone());
            }
        }

        for channel_id in &touched {
            self.notify(channel_id, ChangeKind::Typing);
        }
        evicted
    }
}

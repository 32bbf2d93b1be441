//! The [`LocalStore`] handle and its per-channel layout.
//!
//! Operations are split by concern across `messages`, `pending`, `typing`
//! and `unread`, each adding an `impl LocalStore` block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use parley_shared::constants::DEFAULT_TYPING_TTL_SECS;
use parley_shared::ChannelId;

use crate::models::{ChangeKind, Message, PendingMessage, ReadState, StoreChange, TypingEntry};

const DEFAULT_CHANGE_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    pub(crate) messages: Vec<Message>,
    pub(crate) pending: Vec<PendingMessage>,
    pub(crate) typing: Vec<TypingEntry>,
    pub(crate) read: ReadState,
}

/// Session-owned client state.
#[derive(Debug)]
pub struct LocalStore {
    pub(crate) channels: HashMap<ChannelId, ChannelState>,
    pub(crate) typing_ttl: chrono::Duration,
    changes: broadcast::Sender<StoreChange>,
}

/// The store as shared between the dispatch loop and its readers.
pub type SharedStore = Arc<Mutex<LocalStore>>;

/// Wrap a store for sharing.
pub fn shared(store: LocalStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

impl LocalStore {
    pub fn new(typing_ttl: Duration) -> Self {
        Self::with_capacity(typing_ttl, DEFAULT_CHANGE_CAPACITY)
    }

    /// `change_capacity` bounds how far a slow observer may lag before it
    /// starts missing notifications.
    pub fn with_capacity(typing_ttl: Duration, change_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Self {
            channels: HashMap::new(),
            typing_ttl: chrono::Duration::from_std(typing_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_TYPING_TTL_SECS as i64)),
            changes,
        }
    }

    /// Receive a [`StoreChange`] for every mutation from now on.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn typing_ttl(&self) -> chrono::Duration {
        self.typing_ttl
    }

    /// Channels with any local state.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.keys().cloned().collect()
    }

    /// Drop everything held for a channel (e.g. after leaving it).
    pub fn forget_channel(&mut self, channel_id: &ChannelId) -> bool {
        let removed = self.channels.remove(channel_id).is_some();
        if removed {
            debug!(channel = %channel_id, "Forgot channel state");
            self.notify(channel_id, ChangeKind::Removed);
        }
        removed
    }

    pub(crate) fn channel(&self, channel_id: &ChannelId) -> Option<&ChannelState> {
        self.channels.get(channel_id)
    }

    pub(crate) fn channel_mut(&mut self, channel_id: &ChannelId) -> &mut ChannelState {
        self.channels.entry(channel_id.clone()).or_default()
    }

    pub(crate) fn notify(&self, channel_id: &ChannelId, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            channel_id: channel_id.clone(),
            kind,
        });
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TYPING_TTL_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confirmation;
    use parley_shared::MessageId;

    #[test]
    fn test_sessions_are_independent() {
        let mut a = LocalStore::default();
        let b = LocalStore::default();
        let channel = ChannelId::new("c1");

        a.add_pending(&channel, "hi", None);
        assert_eq!(a.pending(&channel).len(), 1);
        assert!(b.pending(&channel).is_empty());
    }

    #[test]
    fn test_changes_are_broadcast() {
        let mut store = LocalStore::default();
        let mut rx = store.subscribe_changes();
        let channel = ChannelId::new("c1");

        store.add_pending(&channel, "hi", None);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreChange {
                channel_id: channel.clone(),
                kind: ChangeKind::Pending
            }
        );

        assert!(store.forget_channel(&channel));
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Removed);
        assert!(!store.forget_channel(&channel));
    }

    #[test]
    fn test_forget_channel_drops_messages() {
        let mut store = LocalStore::default();
        let channel = ChannelId::new("c1");
        let msg = crate::messages::tests::message("m1", "c1", None);
        assert_eq!(
            store.confirm_message(msg, true),
            Confirmation::Appended { matched: None }
        );

        store.forget_channel(&channel);
        assert!(store.messages(&channel).is_empty());
        assert!(store.message(&channel, &MessageId::new("m1")).is_none());
    }
}

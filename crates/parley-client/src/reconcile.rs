//! Applies decoded channel events to the local store and the membership
//! directory.
//!
//! The [`Reconciler`] is the session's stable [`EventHandler`]. It runs
//! synchronously inside dispatch and never awaits; anything that needs I/O
//! (read acknowledgements, navigation) is queued as a [`SessionEffect`] for
//! the session loop to perform afterwards.

use std::sync::{Arc, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use parley_net::EventHandler;
use parley_shared::protocol::{ChatEvent, GroupEvent, Message, UserEvent};
use parley_shared::schema::{resolve_address, ChatNamespace, GroupNamespace};
use parley_shared::{Address, ChannelEvent, ChannelId, GroupId, MessageId};
use parley_store::{Confirmation, LocalStore, SharedStore};

use crate::collaborators::{ActiveView, IdentityProvider, ViewTarget};
use crate::directory::Directory;

/// Follow-up work produced while reconciling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    AcknowledgeRead {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    NavigateAway(ViewTarget),
}

pub struct Reconciler {
    store: SharedStore,
    directory: Directory,
    identity: Arc<dyn IdentityProvider>,
    active: Arc<dyn ActiveView>,
    effects: Vec<SessionEffect>,
    membership_changed: bool,
}

impl Reconciler {
    pub fn new(
        store: SharedStore,
        directory: Directory,
        identity: Arc<dyn IdentityProvider>,
        active: Arc<dyn ActiveView>,
    ) -> Self {
        Self {
            store,
            directory,
            identity,
            active,
            effects: Vec::new(),
            membership_changed: false,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Seed or patch membership outside of realtime events (initial load).
    pub fn directory_mut(&mut self) -> &mut Directory {
        self.membership_changed = true;
        &mut self.directory
    }

    pub fn drain_effects(&mut self) -> Vec<SessionEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Whether membership changed since the last call.
    pub fn take_membership_changed(&mut self) -> bool {
        std::mem::replace(&mut self.membership_changed, false)
    }

    fn store(&self) -> MutexGuard<'_, LocalStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // chat:<channel>
    // -----------------------------------------------------------------------

    fn on_chat(&mut self, address: &Address, event: ChatEvent) {
        let channel_id = match &event {
            ChatEvent::MessageSent(m) => &m.channel_id,
            ChatEvent::MessageUpdated(u) => &u.channel_id,
            ChatEvent::MessageDeleted(r) => &r.channel_id,
            ChatEvent::Typing(t) => &t.channel_id,
        };
        if resolve_address::<ChatNamespace>(channel_id) != *address {
            warn!(
                address = %address,
                channel = %channel_id,
                "Dropping chat event for a different channel"
            );
            return;
        }

        match event {
            ChatEvent::MessageSent(message) => self.on_message_sent(message),
            ChatEvent::MessageUpdated(update) => {
                if !self.store().update_message(&update) {
                    debug!(channel = %update.channel_id, id = %update.id, "Update for unknown message");
                }
            }
            ChatEvent::MessageDeleted(r) => {
                if !self.store().delete_message(&r.channel_id, &r.id) {
                    debug!(channel = %r.channel_id, id = %r.id, "Delete for unknown message");
                }
            }
            ChatEvent::Typing(signal) => {
                let me = self.identity.current_user_id();
                if me.as_ref() == Some(&signal.user.id) {
                    return;
                }
                self.store()
                    .upsert_typing(&signal.channel_id, signal.user, Utc::now());
            }
        }
    }

    fn on_message_sent(&mut self, message: Message) {
        let me = self.identity.current_user_id();
        let is_active = self.active.active_channel_id().as_ref() == Some(&message.channel_id);
        let own = me.is_some() && message.author_id() == me.as_ref();
        let channel_id = message.channel_id.clone();
        let message_id = message.id.clone();
        let author_id = message.author_id().cloned();

        let mut store = self.store();
        let confirmation = store.confirm_message(message.clone(), own);
        if confirmation == Confirmation::Duplicate {
            return;
        }
        if let Confirmation::Appended { matched: Some(nonce) } = confirmation {
            debug!(channel = %channel_id, nonce = %nonce, "Pending message confirmed");
        }

        if let Some(author_id) = &author_id {
            store.clear_typing(&channel_id, author_id);
        }

        if is_active {
            store.mark_read_through(&message);
            drop(store);
            self.effects.push(SessionEffect::AcknowledgeRead {
                channel_id,
                message_id,
            });
        } else if !own {
            store.increment_unread(&channel_id);
        }
    }

    // -----------------------------------------------------------------------
    // user:<id> and group:<id>
    // -----------------------------------------------------------------------

    fn on_user(&mut self, event: UserEvent) {
        match event {
            UserEvent::GroupCreated(group) | UserEvent::GroupUpdated(group) => {
                info!(group = %group.id, "Group membership updated");
                self.directory.upsert_group(group);
            }
            UserEvent::GroupRemoved(r) => self.remove_group(&r.group_id),
            UserEvent::DmCreated(dm) | UserEvent::DmUpdated(dm) => {
                info!(channel = %dm.id, "DM channel updated");
                self.directory.upsert_dm(dm);
            }
            UserEvent::DmRemoved(r) => {
                if self.directory.remove_dm(&r.channel_id).is_none() {
                    return;
                }
                info!(channel = %r.channel_id, "DM channel removed");
                self.store().forget_channel(&r.channel_id);
                if self.active.active_channel_id().as_ref() == Some(&r.channel_id) {
                    self.effects
                        .push(SessionEffect::NavigateAway(ViewTarget::Channel(r.channel_id)));
                }
            }
        }
        self.membership_changed = true;
    }

    fn on_group(&mut self, address: &Address, event: GroupEvent) {
        let group_id = match &event {
            GroupEvent::GroupUpdated(g) => &g.id,
            GroupEvent::GroupDeleted(r) => &r.group_id,
            GroupEvent::ChannelCreated(c) | GroupEvent::ChannelUpdated(c) => &c.group_id,
            GroupEvent::ChannelDeleted(r) => &r.group_id,
        };
        if resolve_address::<GroupNamespace>(group_id) != *address {
            warn!(address = %address, group = %group_id, "Dropping group event for a different group");
            return;
        }

        match event {
            GroupEvent::GroupUpdated(group) => self.directory.upsert_group(group),
            GroupEvent::GroupDeleted(r) => self.remove_group(&r.group_id),
            GroupEvent::ChannelCreated(channel) | GroupEvent::ChannelUpdated(channel) => {
                let (group_id, channel_id) = (channel.group_id.clone(), channel.id.clone());
                if !self.directory.upsert_channel(channel) {
                    warn!(group = %group_id, channel = %channel_id, "Channel for unknown group");
                    return;
                }
            }
            GroupEvent::ChannelDeleted(r) => {
                if self.directory.remove_channel(&r.group_id, &r.channel_id).is_none() {
                    return;
                }
                info!(group = %r.group_id, channel = %r.channel_id, "Channel removed");
                self.store().forget_channel(&r.channel_id);
                if self.active.active_channel_id().as_ref() == Some(&r.channel_id) {
                    self.effects
                        .push(SessionEffect::NavigateAway(ViewTarget::Channel(r.channel_id)));
                }
            }
        }
        self.membership_changed = true;
    }

    fn remove_group(&mut self, group_id: &GroupId) {
        let Some(entry) = self.directory.remove_group(group_id) else {
            return;
        };
        info!(group = %group_id, channels = entry.channels.len(), "Group removed");

        {
            let mut store = self.store();
            for channel_id in entry.channels.keys() {
                store.forget_channel(channel_id);
            }
        }

        let active_group = self.active.active_group_id().as_ref() == Some(group_id);
        let active_channel = self
            .active
            .active_channel_id()
            .is_some_and(|c| entry.channels.contains_key(&c));
        if active_group || active_channel {
            self.effects
                .push(SessionEffect::NavigateAway(ViewTarget::Group(group_id.clone())));
        }
    }
}

impl EventHandler for Reconciler {
    fn on_event(&mut self, address: &Address, event: ChannelEvent) {
        match event {
            ChannelEvent::Chat(event) => self.on_chat(address, event),
            ChannelEvent::User(event) => self.on_user(event),
            ChannelEvent::Group(event) => self.on_group(address, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{StaticIdentity, ViewState};
    use crate::directory::tests::{channel, dm, group};
    use chrono::TimeZone;
    use parley_shared::protocol::{
        Author, ChannelRef, GroupChannelRef, GroupRef, MessageRef, MessageUpdate, TypingSignal,
    };
    use parley_shared::{Nonce, UserId};
    use parley_store::shared;

    fn author(id: &str) -> Author {
        Author {
            id: UserId::new(id),
            name: id.to_uppercase(),
            image: None,
        }
    }

    fn sent(id: &str, channel: &str, from: &str, nonce: Option<Nonce>) -> ChannelEvent {
        ChannelEvent::Chat(ChatEvent::MessageSent(Message {
            id: MessageId::new(id),
            channel_id: ChannelId::new(channel),
            author: Some(author(from)),
            content: format!("content of {id}"),
            reply_to: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            nonce,
            edited_at: None,
        }))
    }

    fn chat(channel: &str) -> Address {
        resolve_address::<ChatNamespace>(&ChannelId::new(channel))
    }

    fn setup(me: &str) -> (Reconciler, SharedStore, ViewState) {
        let store = shared(LocalStore::default());
        let view = ViewState::new();
        let reconciler = Reconciler::new(
            store.clone(),
            Directory::new(),
            Arc::new(StaticIdentity(Some(UserId::new(me)))),
            Arc::new(view.clone()),
        );
        (reconciler, store, view)
    }

    #[test]
    fn test_confirmation_replaces_pending() {
        let (mut rec, store, _) = setup("alice");
        let c1 = ChannelId::new("c1");
        let nonce = store.lock().unwrap().add_pending(&c1, "hi", None);

        rec.on_event(&chat("c1"), sent("m1", "c1", "alice", Some(nonce)));

        let store = store.lock().unwrap();
        assert!(store.pending(&c1).is_empty());
        assert_eq!(store.messages(&c1).len(), 1);
        // Own message in an inactive channel is not unread.
        assert_eq!(store.unread(&c1), 0);
    }

    #[test]
    fn test_foreign_nonce_leaves_own_pending() {
        let (mut rec, store, _) = setup("bob");
        let c1 = ChannelId::new("c1");
        let nonce = store.lock().unwrap().add_pending(&c1, "draft", None);

        // Another sender's confirmation that happens to carry the same nonce.
        rec.on_event(&chat("c1"), sent("m1", "c1", "alice", Some(nonce)));

        let store = store.lock().unwrap();
        let pending = store.pending(&c1);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].nonce, nonce);
        assert_eq!(pending[0].content, "draft");
        assert_eq!(store.messages(&c1).len(), 1);
        assert_eq!(store.unread(&c1), 1);
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let (mut rec, store, _) = setup("alice");
        let c1 = ChannelId::new("c1");

        rec.on_event(&chat("c1"), sent("m1", "c1", "bob", None));
        rec.on_event(&chat("c1"), sent("m1", "c1", "bob", None));

        let store = store.lock().unwrap();
        assert_eq!(store.messages(&c1).len(), 1);
        assert_eq!(store.unread(&c1), 1);
    }

    #[test]
    fn test_unread_counts_then_resets() {
        let (mut rec, store, _) = setup("alice");
        let c2 = ChannelId::new("c2");
        for id in ["m1", "m2", "m3"] {
            rec.on_event(&chat("c2"), sent(id, "c2", "bob", None));
        }
        assert_eq!(store.lock().unwrap().unread(&c2), 3);

        store.lock().unwrap().mark_read(&c2, Utc::now());
        let state = store.lock().unwrap().read_state(&c2);
        assert_eq!(state.unread, 0);
        assert_eq!(state.last_read_message, Some(MessageId::new("m3")));
        assert!(rec.drain_effects().is_empty());
    }

    #[test]
    fn test_active_channel_marks_read() {
        let (mut rec, store, view) = setup("alice");
        view.open(None, Some(ChannelId::new("c1")));

        rec.on_event(&chat("c1"), sent("m1", "c1", "bob", None));

        let state = store.lock().unwrap().read_state(&ChannelId::new("c1"));
        assert_eq!(state.unread, 0);
        assert_eq!(state.last_read_message, Some(MessageId::new("m1")));
        assert_eq!(
            rec.drain_effects(),
            vec![SessionEffect::AcknowledgeRead {
                channel_id: ChannelId::new("c1"),
                message_id: MessageId::new("m1"),
            }]
        );
    }

    #[test]
    fn test_mismatched_channel_is_dropped() {
        let (mut rec, store, _) = setup("alice");
        rec.on_event(&chat("c1"), sent("m1", "other", "bob", None));
        let store = store.lock().unwrap();
        assert!(store.messages(&ChannelId::new("other")).is_empty());
        assert!(store.messages(&ChannelId::new("c1")).is_empty());
    }

    #[test]
    fn test_update_and_delete() {
        let (mut rec, store, _) = setup("alice");
        let c1 = ChannelId::new("c1");

        // Unknown ids are no-ops.
        rec.on_event(
            &chat("c1"),
            ChannelEvent::Chat(ChatEvent::MessageDeleted(MessageRef {
                id: MessageId::new("ghost"),
                channel_id: c1.clone(),
            })),
        );

        rec.on_event(&chat("c1"), sent("m1", "c1", "bob", None));
        rec.on_event(
            &chat("c1"),
            ChannelEvent::Chat(ChatEvent::MessageUpdated(MessageUpdate {
                id: MessageId::new("m1"),
                channel_id: c1.clone(),
                content: Some("edited".into()),
                edited_at: Some(Utc::now()),
            })),
        );
        assert_eq!(store.lock().unwrap().messages(&c1)[0].content, "edited");

        rec.on_event(
            &chat("c1"),
            ChannelEvent::Chat(ChatEvent::MessageDeleted(MessageRef {
                id: MessageId::new("m1"),
                channel_id: c1.clone(),
            })),
        );
        assert!(store.lock().unwrap().messages(&c1).is_empty());
    }

    #[test]
    fn test_typing_ignores_self_and_clears_on_message() {
        let (mut rec, store, _) = setup("alice");
        let c1 = ChannelId::new("c1");
        for who in ["alice", "bob"] {
            rec.on_event(
                &chat("c1"),
                ChannelEvent::Chat(ChatEvent::Typing(TypingSignal {
                    channel_id: c1.clone(),
                    user: author(who),
                })),
            );
        }

        let typing = store.lock().unwrap().typing(&c1, Utc::now());
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].user.id, UserId::new("bob"));

        rec.on_event(&chat("c1"), sent("m1", "c1", "bob", None));
        assert!(store.lock().unwrap().typing(&c1, Utc::now()).is_empty());
    }

    #[test]
    fn test_membership_lifecycle() {
        let (mut rec, store, view) = setup("alice");
        let user_addr = Address::from("user:alice");
        let group_addr = resolve_address::<GroupNamespace>(&GroupId::new("g1"));

        rec.on_event(&user_addr, ChannelEvent::User(UserEvent::GroupCreated(group("g1"))));
        rec.on_event(&group_addr, ChannelEvent::Group(GroupEvent::ChannelCreated(channel("c1", "g1"))));
        rec.on_event(&user_addr, ChannelEvent::User(UserEvent::DmCreated(dm("d1"))));
        assert!(rec.take_membership_changed());
        assert!(!rec.take_membership_changed());
        assert_eq!(rec.directory().chat_channel_ids().len(), 2);

        rec.on_event(&chat("c1"), sent("m1", "c1", "bob", None));
        view.open(Some(GroupId::new("g1")), Some(ChannelId::new("c1")));

        rec.on_event(&user_addr, ChannelEvent::User(UserEvent::GroupRemoved(GroupRef {
            group_id: GroupId::new("g1"),
        })));
        assert!(rec.take_membership_changed());
        assert!(store.lock().unwrap().messages(&ChannelId::new("c1")).is_empty());
        assert_eq!(
            rec.drain_effects(),
            vec![SessionEffect::NavigateAway(ViewTarget::Group(GroupId::new("g1")))]
        );

        // Removing a DM nobody is viewing emits no navigation.
        rec.on_event(&user_addr, ChannelEvent::User(UserEvent::DmRemoved(ChannelRef {
            channel_id: ChannelId::new("d1"),
        })));
        assert!(rec.drain_effects().is_empty());
        assert!(rec.directory().dms().next().is_none());
    }

    #[test]
    fn test_active_dm_removed_navigates_away() {
        let (mut rec, store, view) = setup("alice");
        let user_addr = Address::from("user:alice");
        let d1 = ChannelId::new("d1");
        rec.on_event(&user_addr, ChannelEvent::User(UserEvent::DmCreated(dm("d1"))));
        rec.on_event(&chat("d1"), sent("m1", "d1", "bob", None));
        view.open(None, Some(d1.clone()));
        rec.drain_effects();
        rec.take_membership_changed();

        rec.on_event(&user_addr, ChannelEvent::User(UserEvent::DmRemoved(ChannelRef {
            channel_id: d1.clone(),
        })));

        assert!(rec.take_membership_changed());
        assert!(rec.directory().dms().next().is_none());
        assert!(store.lock().unwrap().messages(&d1).is_empty());
        assert_eq!(
            rec.drain_effects(),
            vec![SessionEffect::NavigateAway(ViewTarget::Channel(d1))]
        );
    }

    #[test]
    fn test_channel_deleted_navigates_away() {
        let (mut rec, _, view) = setup("alice");
        let group_addr = resolve_address::<GroupNamespace>(&GroupId::new("g1"));
        rec.directory_mut().upsert_group(group("g1"));
        rec.on_event(&group_addr, ChannelEvent::Group(GroupEvent::ChannelCreated(channel("c1", "g1"))));
        view.open(Some(GroupId::new("g1")), Some(ChannelId::new("c1")));

        rec.on_event(
            &group_addr,
            ChannelEvent::Group(GroupEvent::ChannelDeleted(GroupChannelRef {
                group_id: GroupId::new("g1"),
                channel_id: ChannelId::new("c1"),
            })),
        );
        assert_eq!(
            rec.drain_effects(),
            vec![SessionEffect::NavigateAway(ViewTarget::Channel(ChannelId::new("c1")))]
        );
    }
}

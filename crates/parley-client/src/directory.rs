//! Groups, their chat channels and DM channels the user belongs to.
//!
//! Lifecycle events upsert or remove entries by id. The directory is also
//! where the subscription set comes from.

use std::collections::{BTreeMap, BTreeSet};

use parley_shared::protocol::{ChatChannel, DmChannel, Group};
use parley_shared::schema::{resolve_address, ChatNamespace, GroupNamespace, UserNamespace};
use parley_shared::{Address, ChannelId, GroupId, UserId};

#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub group: Group,
    pub channels: BTreeMap<ChannelId, ChatChannel>,
}

#[derive(Debug, Clone, Default)]
pub struct Directory {
    groups: BTreeMap<GroupId, GroupEntry>,
    dms: BTreeMap<ChannelId, DmChannel>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupEntry> {
        self.groups.values()
    }

    pub fn group(&self, id: &GroupId) -> Option<&GroupEntry> {
        self.groups.get(id)
    }

    pub fn dms(&self) -> impl Iterator<Item = &DmChannel> {
        self.dms.values()
    }

    /// Insert a group or refresh its metadata, keeping known channels.
    pub fn upsert_group(&mut self, group: Group) {
        match self.groups.get_mut(&group.id) {
            Some(entry) => entry.group = group,
            None => {
                self.groups.insert(
                    group.id.clone(),
                    GroupEntry {
                        group,
                        channels: BTreeMap::new(),
                    },
                );
            }
        }
    }

    pub fn remove_group(&mut self, id: &GroupId) -> Option<GroupEntry> {
        self.groups.remove(id)
    }

    /// Returns `false` when the owning group is unknown.
    pub fn upsert_channel(&mut self, channel: ChatChannel) -> bool {
        match self.groups.get_mut(&channel.group_id) {
            Some(entry) => {
                entry.channels.insert(channel.id.clone(), channel);
                true
            }
            None => false,
        }
    }

    pub fn remove_channel(&mut self, group_id: &GroupId, channel_id: &ChannelId) -> Option<ChatChannel> {
        self.groups.get_mut(group_id)?.channels.remove(channel_id)
    }

    pub fn upsert_dm(&mut self, dm: DmChannel) {
        self.dms.insert(dm.id.clone(), dm);
    }

    pub fn remove_dm(&mut self, id: &ChannelId) -> Option<DmChannel> {
        self.dms.remove(id)
    }

    /// Every chat channel, group channels first.
    pub fn chat_channel_ids(&self) -> Vec<ChannelId> {
        self.groups
            .values()
            .flat_map(|entry| entry.channels.keys().cloned())
            .chain(self.dms.keys().cloned())
            .collect()
    }

    /// Addresses a session for `user` should be subscribed to.
    pub fn subscription_addresses(&self, user: Option<&UserId>) -> BTreeSet<Address> {
        let mut addresses = BTreeSet::new();
        if let Some(user) = user {
            addresses.insert(resolve_address::<UserNamespace>(user));
        }
        for entry in self.groups.values() {
            addresses.insert(resolve_address::<GroupNamespace>(&entry.group.id));
            for channel_id in entry.channels.keys() {
                addresses.insert(resolve_address::<ChatNamespace>(channel_id));
            }
        }
        for channel_id in self.dms.keys() {
            addresses.insert(resolve_address::<ChatNamespace>(channel_id));
        }
        addresses
    }
}

use chrono::{DateTime, Utc};

use parley_shared::ChannelId;

use crate::models::{ChangeKind, Message, ReadState};
use crate::store::LocalStore;

impl LocalStore {
    pub fn unread(&self, channel_id: &ChannelId) -> u32 {
        self.channel(channel_id).map(|c| c.read.unread).unwrap_or(0)
    }

    pub fn read_state(&self, channel_id: &ChannelId) -> ReadState {
        self.channel(channel_id)
            .map(|c| c.read.clone())
            .unwrap_or_default()
    }

    /// Count one more unread message.
    pub fn increment_unread(&mut self, channel_id: &ChannelId) -> u32 {
        let read = &mut self.channel_mut(channel_id).read;
        read.unread = read.unread.saturating_add(1);
        let unread = read.unread;
        self.notify(channel_id, ChangeKind::Unread);
        unread
    }

    /// Seed a counter from a server-side snapshot.
    pub fn set_unread(&mut self, channel_id: &ChannelId, unread: u32) {
        self.channel_mut(channel_id).read.unread = unread;
        self.notify(channel_id, ChangeKind::Unread);
    }

    /// Reset the counter and move "last read" to the newest loaded message.
    /// Both only ever move forward.
    pub fn mark_read(&mut self, channel_id: &ChannelId, at: DateTime<Utc>) {
        let channel = self.channel_mut(channel_id);
        let newest = channel.messages.last().map(|m| m.id.clone());
        let read = &mut channel.read;
        read.unread = 0;
        if read.last_read_at.map_or(true, |prev| at >= prev) {
            read.last_read_at = Some(at);
            if newest.is_some() {
                read.last_read_message = newest;
            }
        }
        self.notify(channel_id, ChangeKind::Unread);
    }

    /// Mark everything up to `message` as read while the channel is viewed.
    pub fn mark_read_through(&mut self, message: &Message) {
        let channel_id = message.channel_id.clone();
        let read = &mut self.channel_mut(&channel_id).read;
        let newer = read.last_read_at.map_or(true, |prev| message.timestamp >= prev);
        read.unread = 0;
        if newer {
            read.last_read_at = Some(message.timestamp);
            read.last_read_message = Some(message.id.clone());
        }
        self.notify(&channel_id, ChangeKind::Unread);
    }

    /// Sum of unread counters over `channels` (a group's channels, the DM
    /// list, ...).
    pub fn unread_for<'a, I>(&self, channels: I) -> u32
    where
        I: IntoIterator<Item = &'a ChannelId>,
    {
        channels
            .into_iter()
            .map(|id| self.unread(id))
            .fold(0u32, u32::saturating_add)
    }

    pub fn total_unread(&self) -> u32 {
        self.channels
            .values()
            .map(|c| c.read.unread)
            .fold(0u32, u32::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::tests::message;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_counter_counts_and_resets() {
        let mut store = LocalStore::default();
        let c1 = ChannelId::new("c1");
        for _ in 0..3 {
            store.increment_unread(&c1);
        }
        assert_eq!(store.unread(&c1), 3);

        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        store.mark_read(&c1, t);
        assert_eq!(store.unread(&c1), 0);
        assert_eq!(store.read_state(&c1).last_read_at, Some(t));

        // Going back in time does not rewind "last read".
        store.mark_read(&c1, t - Duration::hours(1));
        assert_eq!(store.read_state(&c1).last_read_at, Some(t));
    }

    #[test]
    fn test_mark_read_tracks_newest_message() {
        let mut store = LocalStore::default();
        let c1 = ChannelId::new("c1");
        store.confirm_message(message("m1", "c1", None), false);
        store.mark_read(&c1, Utc::now());
        assert_eq!(store.read_state(&c1).last_read_message, Some(message("m1", "c1", None).id));

        store.confirm_message(message("m2", "c1", None), false);
        store.increment_unread(&c1);
        let later = Utc::now() + Duration::seconds(1);
        store.mark_read(&c1, later);
        let state = store.read_state(&c1);
        assert_eq!(state.unread, 0);
        assert_eq!(state.last_read_at, Some(later));
        assert_eq!(state.last_read_message, Some(message("m2", "c1", None).id));

        // A stale mark does not move the marker back.
        store.mark_read(&c1, later - Duration::hours(1));
        assert_eq!(store.read_state(&c1).last_read_message, Some(message("m2", "c1", None).id));
    }

    #[test]
    fn test_mark_read_through_message() {
        let mut store = LocalStore::default();
        let msg = message("m1", "c1", None);
        store.increment_unread(&msg.channel_id);

        store.mark_read_through(&msg);
        let state = store.read_state(&msg.channel_id);
        assert_eq!(state.unread, 0);
        assert_eq!(state.last_read_message, Some(msg.id.clone()));
        assert_eq!(state.last_read_at, Some(msg.timestamp));
    }

    #[test]
    fn test_aggregates() {
        let mut store = LocalStore::default();
        let (a, b, c) = (ChannelId::new("a"), ChannelId::new("b"), ChannelId::new("c"));
        store.increment_unread(&a);
        store.set_unread(&b, 4);
        store.increment_unread(&c);

        assert_eq!(store.unread_for([&a, &b]), 5);
        assert_eq!(store.total_unread(), 6);
        assert_eq!(store.unread(&ChannelId::new("never-seen")), 0);
    }
}

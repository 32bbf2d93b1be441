use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use parley_shared::{ChannelId, MessageId, Nonce};

use crate::error::{Result, StoreError};
use crate::models::{ChangeKind, PendingMessage, PendingState};
use crate::store::LocalStore;

impl LocalStore {
    /// A nonce no other pending entry in this store carries. Random, so
    /// sessions sharing a channel do not hand out the same values.
    fn fresh_nonce(&self) -> Nonce {
        loop {
            let nonce = Nonce(Uuid::new_v4().as_u128() as u64);
            let taken = self
                .channels
                .values()
                .any(|c| c.pending.iter().any(|p| p.nonce == nonce));
            if !taken {
                return nonce;
            }
        }
    }

    /// Record an optimistic send and return its nonce.
    pub fn add_pending(
        &mut self,
        channel_id: &ChannelId,
        content: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> Nonce {
        let nonce = self.fresh_nonce();

        self.channel_mut(channel_id).pending.push(PendingMessage {
            nonce,
            channel_id: channel_id.clone(),
            content: content.into(),
            reply_to,
            sent_at: Utc::now(),
            state: PendingState::Sending,
        });
        debug!(channel = %channel_id, nonce = %nonce, "Pending message added");
        self.notify(channel_id, ChangeKind::Pending);
        nonce
    }

    /// Snapshot of a channel's pending messages, in send order.
    pub fn pending(&self, channel_id: &ChannelId) -> Vec<PendingMessage> {
        self.channel(channel_id)
            .map(|c| c.pending.clone())
            .unwrap_or_default()
    }

    fn pending_mut(&mut self, channel_id: &ChannelId, nonce: Nonce) -> Result<&mut PendingMessage> {
        self.channels
            .get_mut(channel_id)
            .and_then(|c| c.pending.iter_mut().find(|p| p.nonce == nonce))
            .ok_or_else(|| StoreError::PendingNotFound {
                channel_id: channel_id.clone(),
                nonce,
            })
    }

    /// Mark a send as failed. The content stays visible for retry.
    pub fn error_pending(
        &mut self,
        channel_id: &ChannelId,
        nonce: Nonce,
        reason: impl Into<String>,
    ) -> Result<()> {
        let pending = self.pending_mut(channel_id, nonce)?;
        pending.state = PendingState::Errored(reason.into());
        self.notify(channel_id, ChangeKind::Pending);
        Ok(())
    }

    /// Move an errored message back to sending; returns it so the caller can
    /// resend its content under the same nonce.
    pub fn retry_pending(&mut self, channel_id: &ChannelId, nonce: Nonce) -> Result<PendingMessage> {
        let pending = self.pending_mut(channel_id, nonce)?;
        if !pending.is_errored() {
            return Err(StoreError::InvalidTransition {
                nonce,
                from: pending.state.label(),
                to: PendingState::Sending.label(),
            });
        }
        pending.state = PendingState::Sending;
        pending.sent_at = Utc::now();
        let snapshot = pending.clone();
        self.notify(channel_id, ChangeKind::Pending);
        Ok(snapshot)
    }

    /// Drop an errored message the user gave up on.
    pub fn dismiss_pending(&mut self, channel_id: &ChannelId, nonce: Nonce) -> Result<PendingMessage> {
        let pending = self.pending_mut(channel_id, nonce)?;
        if !pending.is_errored() {
            return Err(StoreError::InvalidTransition {
                nonce,
                from: pending.state.label(),
                to: "dismissed",
            });
        }

        let channel = self.channel_mut(channel_id);
        let idx = channel
            .pending
            .iter()
            .position(|p| p.nonce == nonce)
            .ok_or_else(|| StoreError::PendingNotFound {
                channel_id: channel_id.clone(),
                nonce,
            })?;
        let removed = channel.pending.remove(idx);
        self.notify(channel_id, ChangeKind::Pending);
        Ok(removed)
    }
}

//! One logged-in client session.
//!
//! A [`Session`] owns the store, the subscriber with its [`Reconciler`] and
//! the collaborator handles. Transport notifications are processed one at a
//! time: dispatch and reconciliation run synchronously, then queued effects
//! are performed. Read acknowledgements run on their own tasks and never
//! hold up the next notification.
//! Sending goes through a cloneable [`MessageSender`] so the UI can send
//! while the loop keeps running.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use parley_net::{NotificationRx, Subscriber, SubscriptionDiff, Transport, TransportNotification};
use parley_shared::{Address, ChannelId, GroupId, MessageId, Nonce, SchemaRegistry};
use parley_store::{LocalStore, PendingMessage, SharedStore};

use crate::collaborators::{ActiveView, IdentityProvider, Navigator, RpcClient, SendMessageRequest};
use crate::config::ClientConfig;
use crate::directory::Directory;
use crate::error::ClientError;
use crate::reconcile::{Reconciler, SessionEffect};

const TYPING_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a session consumes from the embedding application.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub active: Arc<dyn ActiveView>,
    pub navigator: Arc<dyn Navigator>,
    pub rpc: Arc<dyn RpcClient>,
}

/// Badge counts derived from per-channel unread counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadSummary {
    pub total: u32,
    pub dms: u32,
    pub groups: BTreeMap<GroupId, u32>,
}

pub struct Session {
    subscriber: Subscriber<Reconciler>,
    store: SharedStore,
    sender: MessageSender,
    navigator: Arc<dyn Navigator>,
    identity: Arc<dyn IdentityProvider>,
}

impl Session {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<SchemaRegistry>,
        directory: Directory,
        collaborators: Collaborators,
    ) -> Self {
        let store = parley_store::shared(LocalStore::with_capacity(
            config.typing_ttl,
            config.change_capacity,
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            directory,
            collaborators.identity.clone(),
            collaborators.active,
        );

        Self {
            subscriber: Subscriber::new(transport, registry, reconciler),
            sender: MessageSender {
                store: store.clone(),
                rpc: collaborators.rpc,
            },
            store,
            navigator: collaborators.navigator,
            identity: collaborators.identity,
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    pub fn directory(&self) -> &Directory {
        self.subscriber.handler().directory()
    }

    /// Patch membership outside of realtime events. Call
    /// [`Session::refresh_subscriptions`] afterwards.
    pub fn directory_mut(&mut self) -> &mut Directory {
        self.subscriber.handler_mut().directory_mut()
    }

    pub fn subscriptions(&self) -> &BTreeSet<Address> {
        self.subscriber.desired()
    }

    /// Subscribe to every address the current membership implies.
    pub async fn start(&mut self) -> SubscriptionDiff {
        info!(user = ?self.identity.current_user_id(), "Starting session");
        self.refresh_subscriptions().await
    }

    pub async fn refresh_subscriptions(&mut self) -> SubscriptionDiff {
        let user = self.identity.current_user_id();
        let wanted = self.directory().subscription_addresses(user.as_ref());
        self.subscriber.handler_mut().take_membership_changed();
        self.subscriber.update_subscriptions(wanted).await
    }

    /// Handle one transport notification to completion.
    pub async fn process(&mut self, notification: TransportNotification) {
        match notification {
            TransportNotification::Message(inbound) => {
                self.subscriber.dispatch(inbound);

                let effects = self.subscriber.handler_mut().drain_effects();
                for effect in effects {
                    self.perform(effect);
                }
                if self.subscriber.handler_mut().take_membership_changed() {
                    self.refresh_subscriptions().await;
                }
            }
            TransportNotification::Reconnected => {
                info!("Transport reconnected, re-subscribing");
                self.subscriber.resync().await;
            }
            TransportNotification::Disconnected => {
                warn!("Transport disconnected");
            }
        }
    }

    fn perform(&self, effect: SessionEffect) {
        match effect {
            SessionEffect::AcknowledgeRead {
                channel_id,
                message_id,
            } => {
                let rpc = self.sender.rpc.clone();
                tokio::spawn(async move {
                    if let Err(e) = rpc.acknowledge_read(&channel_id, &message_id).await {
                        warn!(channel = %channel_id, message = %message_id, error = %e, "Read acknowledgement failed");
                    }
                });
            }
            SessionEffect::NavigateAway(target) => self.navigator.navigate_away(&target),
        }
    }

    /// Drive the session until the transport closes.
    pub async fn run(&mut self, mut notifications: NotificationRx) {
        let mut prune = tokio::time::interval(TYPING_PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                notification = notifications.recv() => {
                    match notification {
                        Some(notification) => self.process(notification).await,
                        None => {
                            info!("Transport closed, session loop exiting");
                            break;
                        }
                    }
                }
                _ = prune.tick() => {
                    let evicted = lock(&self.store).prune_typing(Utc::now());
                    if evicted > 0 {
                        debug!(evicted, "Pruned stale typing entries");
                    }
                }
            }
        }
    }

    /// Mark a channel read up to now, e.g. when the user opens it. The
    /// acknowledgement is sent in the background.
    pub fn mark_read(&self, channel_id: &ChannelId) {
        let last = {
            let mut store = lock(&self.store);
            store.mark_read(channel_id, Utc::now());
            store.last_message(channel_id)
        };
        if let Some(message) = last {
            self.perform(SessionEffect::AcknowledgeRead {
                channel_id: channel_id.clone(),
                message_id: message.id,
            });
        }
    }

    pub fn unread_summary(&self) -> UnreadSummary {
        let store = lock(&self.store);
        let directory = self.directory();

        let groups: BTreeMap<GroupId, u32> = directory
            .groups()
            .map(|entry| (entry.group.id.clone(), store.unread_for(entry.channels.keys())))
            .collect();
        let dms = store.unread_for(directory.dms().map(|dm| &dm.id));

        UnreadSummary {
            total: store.total_unread(),
            dms,
            groups,
        }
    }
}

fn lock(store: &SharedStore) -> MutexGuard<'_, LocalStore> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

/// Optimistic send flow: record a pending message, then call the RPC.
///
/// The pending entry is confirmed by the matching `message_sent` event, which
/// may arrive before or after the RPC returns.
#[derive(Clone)]
pub struct MessageSender {
    store: SharedStore,
    rpc: Arc<dyn RpcClient>,
}

impl MessageSender {
    pub async fn send(
        &self,
        channel_id: &ChannelId,
        content: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> Result<Nonce, ClientError> {
        let content = content.into();
        let nonce = lock(&self.store).add_pending(channel_id, content.clone(), reply_to.clone());
        self.submit(SendMessageRequest {
            channel_id: channel_id.clone(),
            content,
            nonce,
            reply_to,
        })
        .await?;
        Ok(nonce)
    }

    /// Resend an errored message under its original nonce.
    pub async fn retry(&self, channel_id: &ChannelId, nonce: Nonce) -> Result<(), ClientError> {
        let pending = lock(&self.store).retry_pending(channel_id, nonce)?;
        self.submit(SendMessageRequest {
            channel_id: pending.channel_id,
            content: pending.content,
            nonce,
            reply_to: pending.reply_to,
        })
        .await
    }

    pub fn dismiss(&self, channel_id: &ChannelId, nonce: Nonce) -> Result<PendingMessage, ClientError> {
        Ok(lock(&self.store).dismiss_pending(channel_id, nonce)?)
    }

    async fn submit(&self, request: SendMessageRequest) -> Result<(), ClientError> {
        let (channel_id, nonce) = (request.channel_id.clone(), request.nonce);
        debug!(channel = %channel_id, nonce = %nonce, "Sending message");

        let Err(e) = self.rpc.send_message(request).await else {
            return Ok(());
        };

        warn!(channel = %channel_id, nonce = %nonce, error = %e, "Send failed");
        if let Err(store_err) = lock(&self.store).error_pending(&channel_id, nonce, e.0.clone()) {
            // Already confirmed by a realtime event.
            debug!(error = %store_err, "No pending entry to mark errored");
        }
        Err(ClientError::SendFailed {
            nonce,
            reason: e.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{StaticIdentity, ViewState};
    use crate::directory::tests::{channel, group};
    use crate::error::RpcError;
    use async_trait::async_trait;
    use parley_net::{MemoryHub, Publisher};
    use parley_shared::protocol::{Author, ChatEvent, GroupChannelRef, GroupEvent, Message};
    use parley_shared::schema::{ChatNamespace, GroupNamespace};
    use parley_shared::UserId;
    use parley_store::PendingState;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct MockRpc {
        sent: Mutex<Vec<SendMessageRequest>>,
        acks: Mutex<Vec<(ChannelId, MessageId)>>,
        fail: Mutex<Option<String>>,
        gate: Option<Arc<Notify>>,
        ack_gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl RpcClient for MockRpc {
        async fn send_message(&self, request: SendMessageRequest) -> Result<(), RpcError> {
            self.sent.lock().unwrap().push(request);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.fail.lock().unwrap().clone() {
                Some(reason) => Err(RpcError(reason)),
                None => Ok(()),
            }
        }

        async fn acknowledge_read(
            &self,
            channel_id: &ChannelId,
            message_id: &MessageId,
        ) -> Result<(), RpcError> {
            self.acks
                .lock()
                .unwrap()
                .push((channel_id.clone(), message_id.clone()));
            if let Some(gate) = &self.ack_gate {
                gate.notified().await;
            }
            Ok(())
        }
    }

    struct Harness {
        hub: MemoryHub,
        session: Session,
        rx: NotificationRx,
        rpc: Arc<MockRpc>,
        view: ViewState,
        server: Publisher,
    }

    fn harness(rpc: MockRpc) -> Harness {
        let hub = MemoryHub::new();
        let registry = Arc::new(SchemaRegistry::standard());
        let (transport, rx) = hub.connect();
        let (server_transport, _server_rx) = hub.connect();
        let rpc = Arc::new(rpc);
        let view = ViewState::new();

        let mut directory = Directory::new();
        directory.upsert_group(group("g1"));
        directory.upsert_channel(channel("c1", "g1"));
        directory.upsert_channel(channel("c2", "g1"));

        let session = Session::new(
            &ClientConfig::default(),
            Arc::new(transport),
            registry.clone(),
            directory,
            Collaborators {
                identity: Arc::new(StaticIdentity(Some(UserId::new("alice")))),
                active: Arc::new(view.clone()),
                navigator: Arc::new(view.clone()),
                rpc: rpc.clone(),
            },
        );
        Harness {
            hub,
            session,
            rx,
            rpc,
            view,
            server: Publisher::new(Arc::new(server_transport), registry),
        }
    }

    fn confirmed(id: &str, channel: &str, from: &str, nonce: Option<Nonce>) -> ChatEvent {
        ChatEvent::MessageSent(Message {
            id: MessageId::new(id),
            channel_id: ChannelId::new(channel),
            author: Some(Author {
                id: UserId::new(from),
                name: from.into(),
                image: None,
            }),
            content: "hello".into(),
            reply_to: None,
            timestamp: Utc::now(),
            nonce,
            edited_at: None,
        })
    }

    async fn pump(h: &mut Harness) {
        let notification = h.rx.recv().await.unwrap();
        h.session.process(notification).await;
    }

    async fn wait_for_acks(rpc: &MockRpc, count: usize) {
        while rpc.acks.lock().unwrap().len() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_start_subscribes_to_membership() {
        let mut h = harness(MockRpc::default());
        let diff = h.session.start().await;
        let added: Vec<&str> = diff.added.iter().map(|a| a.as_str()).collect();
        assert_eq!(added, vec!["chat:c1", "chat:c2", "group:g1", "user:alice"]);
    }

    #[tokio::test]
    async fn test_confirmation_beats_rpc_response() {
        let gate = Arc::new(Notify::new());
        let mut h = harness(MockRpc {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        h.session.start().await;
        let c1 = ChannelId::new("c1");

        let sender = h.session.sender();
        let send = tokio::spawn({
            let c1 = c1.clone();
            async move { sender.send(&c1, "hello", None).await }
        });
        while h.rpc.sent.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let nonce = h.rpc.sent.lock().unwrap()[0].nonce;
        assert_eq!(lock(&h.session.store).pending(&c1).len(), 1);

        // The realtime confirmation lands while the RPC is still in flight.
        h.server
            .publish::<ChatNamespace>(&c1, &confirmed("m1", "c1", "alice", Some(nonce)))
            .await
            .unwrap();
        pump(&mut h).await;
        {
            let store = lock(&h.session.store);
            assert!(store.pending(&c1).is_empty());
            assert_eq!(store.messages(&c1).len(), 1);
        }

        gate.notify_one();
        assert_eq!(send.await.unwrap().unwrap(), nonce);
        let store = lock(&h.session.store);
        assert!(store.pending(&c1).is_empty());
        assert_eq!(store.messages(&c1).len(), 1);
        assert_eq!(store.unread(&c1), 0);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_content_for_retry() {
        let mut h = harness(MockRpc::default());
        *h.rpc.fail.lock().unwrap() = Some("rate limited".into());
        let c1 = ChannelId::new("c1");
        let sender = h.session.sender();

        let (nonce, reason) = match sender.send(&c1, "draft", None).await {
            Err(ClientError::SendFailed { nonce, reason }) => (nonce, reason),
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(reason, "rate limited");
        let pending = lock(&h.session.store).pending(&c1);
        assert_eq!(pending[0].content, "draft");
        assert_eq!(pending[0].state, PendingState::Errored("rate limited".into()));

        *h.rpc.fail.lock().unwrap() = None;
        sender.retry(&c1, nonce).await.unwrap();
        assert_eq!(lock(&h.session.store).pending(&c1)[0].state, PendingState::Sending);
        assert_eq!(h.rpc.sent.lock().unwrap().len(), 2);

        h.session.start().await;
        h.server
            .publish::<ChatNamespace>(&c1, &confirmed("m1", "c1", "alice", Some(nonce)))
            .await
            .unwrap();
        pump(&mut h).await;
        assert!(lock(&h.session.store).pending(&c1).is_empty());
    }

    #[tokio::test]
    async fn test_active_channel_acknowledges_and_summary() {
        let mut h = harness(MockRpc::default());
        h.session.start().await;
        h.view.open(Some(GroupId::new("g1")), Some(ChannelId::new("c1")));

        h.server
            .publish::<ChatNamespace>(&ChannelId::new("c1"), &confirmed("m1", "c1", "bob", None))
            .await
            .unwrap();
        h.server
            .publish::<ChatNamespace>(&ChannelId::new("c2"), &confirmed("m2", "c2", "bob", None))
            .await
            .unwrap();
        pump(&mut h).await;
        pump(&mut h).await;

        wait_for_acks(&h.rpc, 1).await;
        assert_eq!(
            *h.rpc.acks.lock().unwrap(),
            vec![(ChannelId::new("c1"), MessageId::new("m1"))]
        );
        let summary = h.session.unread_summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.groups.get(&GroupId::new("g1")), Some(&1));
        assert_eq!(summary.dms, 0);

        h.session.mark_read(&ChannelId::new("c2"));
        assert_eq!(h.session.unread_summary().total, 0);
        wait_for_acks(&h.rpc, 2).await;
        assert_eq!(
            h.rpc.acks.lock().unwrap()[1],
            (ChannelId::new("c2"), MessageId::new("m2"))
        );
    }

    #[tokio::test]
    async fn test_blocked_acknowledgement_does_not_stall_dispatch() {
        let ack_gate = Arc::new(Notify::new());
        let mut h = harness(MockRpc {
            ack_gate: Some(ack_gate.clone()),
            ..Default::default()
        });
        h.session.start().await;
        h.view.open(Some(GroupId::new("g1")), Some(ChannelId::new("c1")));
        let c1 = ChannelId::new("c1");

        for id in ["m1", "m2"] {
            h.server
                .publish::<ChatNamespace>(&c1, &confirmed(id, "c1", "bob", None))
                .await
                .unwrap();
        }
        // Neither acknowledgement ever completes while these run.
        tokio::time::timeout(Duration::from_secs(5), async {
            pump(&mut h).await;
            pump(&mut h).await;
        })
        .await
        .expect("dispatch waited on a read acknowledgement");

        assert_eq!(lock(&h.session.store).messages(&c1).len(), 2);
        wait_for_acks(&h.rpc, 2).await;
        ack_gate.notify_waiters();
    }

    #[tokio::test]
    async fn test_lifecycle_refreshes_subscriptions() {
        let mut h = harness(MockRpc::default());
        h.session.start().await;
        h.view.open(Some(GroupId::new("g1")), Some(ChannelId::new("c2")));
        let g1 = GroupId::new("g1");

        h.server
            .publish::<GroupNamespace>(&g1, &GroupEvent::ChannelCreated(channel("c3", "g1")))
            .await
            .unwrap();
        pump(&mut h).await;
        assert!(h.session.subscriptions().contains(&Address::from("chat:c3")));

        h.server
            .publish::<GroupNamespace>(
                &g1,
                &GroupEvent::ChannelDeleted(GroupChannelRef {
                    group_id: g1.clone(),
                    channel_id: ChannelId::new("c2"),
                }),
            )
            .await
            .unwrap();
        pump(&mut h).await;
        assert!(!h.session.subscriptions().contains(&Address::from("chat:c2")));
        // The view was on c2, so the navigator closed it.
        assert_eq!(h.view.active_channel_id(), None);
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes() {
        let mut h = harness(MockRpc::default());
        h.session.start().await;
        let before = h.session.subscriptions().clone();

        h.hub.reconnect_all().await;
        pump(&mut h).await; // Disconnected
        pump(&mut h).await; // Reconnected

        assert_eq!(h.session.subscriptions(), &before);
        h.server
            .publish::<ChatNamespace>(&ChannelId::new("c1"), &confirmed("m1", "c1", "bob", None))
            .await
            .unwrap();
        pump(&mut h).await;
        assert_eq!(lock(&h.session.store).messages(&ChannelId::new("c1")).len(), 1);
    }
}

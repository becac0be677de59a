//! In-process fan-out hub.
//!
//! Implements both [`ReplicationTransport`] (rooms of [`SyncMessage`]) and
//! [`RealtimeClient`] (pub/sub topics with presence) over bounded tokio
//! channels. Every member of a room or topic gets its own receiver; a send
//! is fanned out to the N-1 other members. A member whose queue is full is
//! dropped from the group, which ends its stream so it can rejoin and
//! resync.
//!
//! Used for single-process collaboration and as the counting stub in tests:
//! [`HubStats`] records every open and close.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::CollabError;
use crate::protocol::SyncMessage;
use crate::realtime::{
    ChannelEvent, PresenceMeta, PresenceState, RealtimeChannel, RealtimeClient, Subscription,
};
use crate::transport::{Connection, ReplicationTransport, TransportLink, DEFAULT_QUEUE_CAPACITY};
use crate::types::FileUpdate;

/// Snapshot of hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub subscriptions_opened: u64,
    pub subscriptions_closed: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub members_evicted: u64,
}

impl HubStats {
    pub fn active_connections(&self) -> u64 {
        self.connections_opened - self.connections_closed
    }

    pub fn active_subscriptions(&self) -> u64 {
        self.subscriptions_opened - self.subscriptions_closed
    }
}

/// Counters are atomics so the send path never takes a lock for them.
#[derive(Default)]
struct AtomicHubStats {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    subscriptions_opened: AtomicU64,
    subscriptions_closed: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    members_evicted: AtomicU64,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Fanout {
    pub delivered: u64,
    pub dropped: u64,
    /// Members removed because their queue was full.
    pub evicted: u64,
}

/// Members of one room or topic. Also backs the relay server's rooms.
pub(crate) struct FanoutGroup<T> {
    capacity: usize,
    members: RwLock<HashMap<u64, mpsc::Sender<T>>>,
}

impl<T: Clone> FanoutGroup<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            members: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn add_member(&self, member_id: u64) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member_id, tx);
        rx
    }

    pub(crate) fn remove_member(&self, member_id: u64) -> bool {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&member_id)
            .is_some()
    }

    pub(crate) fn member_count(&self) -> usize {
        self.members.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver to every member except `sender`. A member whose queue is
    /// full misses the frame and is removed; its receiver ends once drained.
    pub(crate) fn broadcast_from(&self, sender: Option<u64>, msg: &T) -> Fanout {
        let mut fanout = Fanout::default();
        let mut lagging = Vec::new();
        {
            let members = self.members.read().unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in members.iter() {
                if Some(*id) == sender {
                    continue;
                }
                match tx.try_send(msg.clone()) {
                    Ok(()) => fanout.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        fanout.dropped += 1;
                        lagging.push((*id, tx.clone()));
                    }
                    Err(TrySendError::Closed(_)) => fanout.dropped += 1,
                }
            }
        }
        if !lagging.is_empty() {
            let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in lagging {
                // Skip a member that rejoined under the same id meanwhile.
                if members.get(&id).is_some_and(|current| current.same_channel(&tx)) {
                    members.remove(&id);
                    fanout.evicted += 1;
                    log::warn!("fanout: member {id} lagging, disconnected");
                }
            }
        }
        fanout
    }

    pub(crate) fn send_to(&self, member_id: u64, msg: T) -> bool {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&member_id)
            .is_some_and(|tx| tx.try_send(msg).is_ok())
    }
}

/// A pub/sub topic: fan-out plus tracked presence per member.
struct Topic {
    group: FanoutGroup<ChannelEvent>,
    presence: Mutex<HashMap<u64, (String, PresenceMeta)>>,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        Self {
            group: FanoutGroup::new(capacity),
            presence: Mutex::new(HashMap::new()),
        }
    }

    fn presence_state(&self) -> PresenceState {
        self.presence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(key, meta)| (key.clone(), vec![meta.clone()]))
            .collect()
    }

    fn emit_sync(&self) -> Fanout {
        let state = self.presence_state();
        self.group.broadcast_from(None, &ChannelEvent::PresenceSync(state))
    }
}

struct HubInner {
    capacity: usize,
    rooms: RwLock<HashMap<String, Arc<FanoutGroup<SyncMessage>>>>,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    next_member: AtomicU64,
    stats: AtomicHubStats,
    fail_connects: AtomicBool,
    fail_subscribes: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

impl HubInner {
    fn record_send(&self, fanout: Fanout) {
        self.stats.messages_sent.fetch_add(fanout.delivered, Ordering::Relaxed);
        self.stats.messages_dropped.fetch_add(fanout.dropped, Ordering::Relaxed);
        self.stats.members_evicted.fetch_add(fanout.evicted, Ordering::Relaxed);
    }
}

/// Look up or create the group at `key` and run `enter` on it, all under
/// the map's write lock, so a concurrent [`leave_group`] cannot drop the
/// group between lookup and join.
fn join_group<V, R>(
    map: &RwLock<HashMap<String, Arc<V>>>,
    key: &str,
    make: impl FnOnce() -> V,
    enter: impl FnOnce(&V) -> R,
) -> (Arc<V>, R) {
    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    let group = map.entry(key.to_string()).or_insert_with(|| Arc::new(make())).clone();
    let entered = enter(group.as_ref());
    (group, entered)
}

/// Run `leave` under the map's write lock; it returns whether the group is
/// now empty, in which case the group is removed from the map.
fn leave_group<V>(
    map: &RwLock<HashMap<String, Arc<V>>>,
    key: &str,
    group: &Arc<V>,
    leave: impl FnOnce(&V) -> bool,
) -> bool {
    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    if !leave(group.as_ref()) {
        return false;
    }
    if map.get(key).is_some_and(|current| Arc::ptr_eq(current, group)) {
        map.remove(key);
        return true;
    }
    false
}

/// In-process hub. Clones share the same rooms and topics.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Hub whose members may queue at most `capacity` frames each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                capacity,
                rooms: RwLock::new(HashMap::new()),
                topics: RwLock::new(HashMap::new()),
                next_member: AtomicU64::new(1),
                stats: AtomicHubStats::default(),
                fail_connects: AtomicBool::new(false),
                fail_subscribes: AtomicBool::new(false),
                connect_delay: Mutex::new(None),
            }),
        }
    }

    pub fn stats(&self) -> HubStats {
        let s = &self.inner.stats;
        HubStats {
            connections_opened: s.connections_opened.load(Ordering::Relaxed),
            connections_closed: s.connections_closed.load(Ordering::Relaxed),
            subscriptions_opened: s.subscriptions_opened.load(Ordering::Relaxed),
            subscriptions_closed: s.subscriptions_closed.load(Ordering::Relaxed),
            messages_sent: s.messages_sent.load(Ordering::Relaxed),
            messages_dropped: s.messages_dropped.load(Ordering::Relaxed),
            members_evicted: s.members_evicted.load(Ordering::Relaxed),
        }
    }

    /// Reject every new room connection.
    pub fn set_fail_connects(&self, fail: bool) {
        self.inner.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Reject every new topic subscription.
    pub fn set_fail_subscribes(&self, fail: bool) {
        self.inner.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    /// Hold each connect for `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.inner.connect_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.inner.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn room_members(&self, room: &str) -> usize {
        self.inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map_or(0, |group| group.member_count())
    }

    pub fn topic_count(&self) -> usize {
        self.inner.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_member_id(&self) -> u64 {
        self.inner.next_member.fetch_add(1, Ordering::Relaxed)
    }
}

impl ReplicationTransport for LocalHub {
    fn connect(&self, room: &str, client_id: u64) -> BoxFuture<'_, Result<TransportLink, CollabError>> {
        let room = room.to_string();
        Box::pin(async move {
            let delay = *self.inner.connect_delay.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.inner.fail_connects.load(Ordering::SeqCst) {
                return Err(CollabError::Transport(format!("room {room} refused connection")));
            }

            let capacity = self.inner.capacity;
            let (group, incoming) = join_group(
                &self.inner.rooms,
                &room,
                || FanoutGroup::new(capacity),
                |group| group.add_member(client_id),
            );
            self.inner.stats.connections_opened.fetch_add(1, Ordering::Relaxed);
            log::debug!("hub: client {client_id} joined room {room}");

            let connection = HubConnection {
                inner: self.inner.clone(),
                group,
                room,
                client_id,
                closed: AtomicBool::new(false),
            };
            Ok(TransportLink {
                connection: Arc::new(connection),
                incoming,
            })
        })
    }
}

struct HubConnection {
    inner: Arc<HubInner>,
    group: Arc<FanoutGroup<SyncMessage>>,
    room: String,
    client_id: u64,
    closed: AtomicBool,
}

impl Connection for HubConnection {
    fn send(&self, msg: SyncMessage) -> Result<(), CollabError> {
        if self.is_closed() {
            return Err(CollabError::Transport(format!("connection to {} closed", self.room)));
        }
        let fanout = self.group.broadcast_from(Some(self.client_id), &msg);
        self.inner.record_send(fanout);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let client_id = self.client_id;
        let emptied = leave_group(&self.inner.rooms, &self.room, &self.group, |group| {
            group.remove_member(client_id);
            group.member_count() == 0
        });
        if emptied {
            log::debug!("hub: room {} removed (empty)", self.room);
        } else {
            let fanout = self.group.broadcast_from(None, &SyncMessage::leave(&self.room, client_id));
            self.inner.record_send(fanout);
        }
        self.inner.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl RealtimeClient for LocalHub {
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<Subscription, CollabError>> {
        let topic_name = topic.to_string();
        Box::pin(async move {
            if self.inner.fail_subscribes.load(Ordering::SeqCst) {
                return Err(CollabError::Channel(format!("subscribe to {topic_name} rejected")));
            }
            let member_id = self.next_member_id();
            let capacity = self.inner.capacity;
            let (topic, events) = join_group(
                &self.inner.topics,
                &topic_name,
                || Topic::new(capacity),
                |topic| topic.group.add_member(member_id),
            );
            topic
                .group
                .send_to(member_id, ChannelEvent::PresenceSync(topic.presence_state()));
            self.inner.stats.subscriptions_opened.fetch_add(1, Ordering::Relaxed);

            let channel = HubChannel {
                inner: self.inner.clone(),
                topic,
                topic_name,
                member_id,
                presence_key: Uuid::new_v4().to_string(),
                closed: AtomicBool::new(false),
            };
            Ok(Subscription {
                channel: Arc::new(channel),
                events,
            })
        })
    }
}

struct HubChannel {
    inner: Arc<HubInner>,
    topic: Arc<Topic>,
    topic_name: String,
    member_id: u64,
    presence_key: String,
    closed: AtomicBool,
}

impl HubChannel {
    fn ensure_open(&self) -> Result<(), CollabError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CollabError::Channel(format!("{} unsubscribed", self.topic_name)));
        }
        Ok(())
    }

    fn drop_presence(&self) -> bool {
        self.topic
            .presence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.member_id)
            .is_some()
    }
}

impl RealtimeChannel for HubChannel {
    fn topic(&self) -> &str {
        &self.topic_name
    }

    fn track(&self, meta: PresenceMeta) -> BoxFuture<'_, Result<(), CollabError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.topic
                .presence
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(self.member_id, (self.presence_key.clone(), meta));
            self.inner.record_send(self.topic.emit_sync());
            Ok(())
        })
    }

    fn untrack(&self) -> BoxFuture<'_, Result<(), CollabError>> {
        Box::pin(async move {
            self.ensure_open()?;
            if self.drop_presence() {
                self.inner.record_send(self.topic.emit_sync());
            }
            Ok(())
        })
    }

    fn broadcast(&self, update: FileUpdate) -> BoxFuture<'_, Result<(), CollabError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let fanout = self
                .topic
                .group
                .broadcast_from(Some(self.member_id), &ChannelEvent::Broadcast(update));
            self.inner.record_send(fanout);
            Ok(())
        })
    }

    fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let member_id = self.member_id;
        leave_group(&self.inner.topics, &self.topic_name, &self.topic, |topic| {
            topic.group.remove_member(member_id);
            topic.group.member_count() == 0
        });
        if self.drop_presence() {
            self.inner.record_send(self.topic.emit_sync());
        }
        self.inner.stats.subscriptions_closed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for HubChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use crate::types::Author;

    fn meta(user_id: &str) -> PresenceMeta {
        PresenceMeta {
            user_id: user_id.into(),
            username: user_id.into(),
            avatar_url: None,
            current_file: None,
            online_at: 0,
        }
    }

    #[tokio::test]
    async fn test_room_fan_out_skips_sender() {
        let hub = LocalHub::new();
        let a = hub.connect("room", 1).await.unwrap();
        let mut b = hub.connect("room", 2).await.unwrap();
        let mut c = hub.connect("room", 3).await.unwrap();
        let mut a_in = a.incoming;

        a.connection.send(SyncMessage::update("room", 1, vec![9])).unwrap();

        assert_eq!(b.incoming.recv().await.unwrap().payload, vec![9]);
        assert_eq!(c.incoming.recv().await.unwrap().payload, vec![9]);
        assert!(a_in.try_recv().is_err());
        assert_eq!(hub.stats().messages_sent, 2);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = LocalHub::new();
        let a = hub.connect("room-1", 1).await.unwrap();
        let mut b = hub.connect("room-2", 2).await.unwrap();
        a.connection.send(SyncMessage::update("room-1", 1, vec![1])).unwrap();
        assert!(b.incoming.try_recv().is_err());
        assert_eq!(hub.room_count(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_announces_leave() {
        let hub = LocalHub::new();
        let a = hub.connect("room", 1).await.unwrap();
        let mut b = hub.connect("room", 2).await.unwrap();

        a.connection.close();
        a.connection.close();
        assert!(a.connection.send(SyncMessage::join("room", 1)).is_err());

        let leave = b.incoming.recv().await.unwrap();
        assert_eq!(leave.msg_type, MessageType::Leave);
        assert_eq!(leave.client_id, 1);

        let stats = hub.stats();
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(stats.connections_closed, 1);
        assert_eq!(hub.room_members("room"), 1);
    }

    #[tokio::test]
    async fn test_empty_room_removed() {
        let hub = LocalHub::new();
        let a = hub.connect("room", 1).await.unwrap();
        assert_eq!(hub.room_count(), 1);
        a.connection.close();
        assert_eq!(hub.room_count(), 0);
        assert_eq!(hub.stats().active_connections(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let hub = LocalHub::new();
        hub.set_fail_connects(true);
        assert!(hub.connect("room", 1).await.is_err());
        assert_eq!(hub.stats().connections_opened, 0);
    }

    #[tokio::test]
    async fn test_presence_sync_is_full_state() {
        let hub = LocalHub::new();
        let mut a = hub.subscribe("presence-p").await.unwrap();
        let b = hub.subscribe("presence-p").await.unwrap();

        // Initial sync on subscribe.
        assert_eq!(
            a.events.recv().await.unwrap(),
            ChannelEvent::PresenceSync(PresenceState::new())
        );

        a.channel.track(meta("alice")).await.unwrap();
        b.channel.track(meta("bob")).await.unwrap();

        let _first = a.events.recv().await.unwrap();
        match a.events.recv().await.unwrap() {
            ChannelEvent::PresenceSync(state) => {
                let mut users: Vec<_> = state.values().flatten().map(|m| m.user_id.clone()).collect();
                users.sort();
                assert_eq!(users, vec!["alice", "bob"]);
            }
            other => panic!("unexpected event {other:?}"),
        }

        b.channel.unsubscribe();
        match a.events.recv().await.unwrap() {
            ChannelEvent::PresenceSync(state) => assert_eq!(state.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_others_only() {
        let hub = LocalHub::new();
        let mut a = hub.subscribe("file-p-f").await.unwrap();
        let mut b = hub.subscribe("file-p-f").await.unwrap();
        let _ = a.events.recv().await;
        let _ = b.events.recv().await;

        let update = FileUpdate {
            file_id: "f".into(),
            content: "x".into(),
            user: Author {
                user_id: "alice".into(),
                username: "Alice".into(),
                avatar_url: None,
            },
        };
        a.channel.broadcast(update.clone()).await.unwrap();
        assert_eq!(b.events.recv().await.unwrap(), ChannelEvent::Broadcast(update));
        assert!(a.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_lagging_member() {
        let hub = LocalHub::with_capacity(4);
        let a = hub.connect("room", 1).await.unwrap();
        let mut b = hub.connect("room", 2).await.unwrap();
        let mut c = hub.connect("room", 3).await.unwrap();

        for i in 0..10u8 {
            a.connection.send(SyncMessage::update("room", 1, vec![i])).unwrap();
            // c keeps up, b never reads
            assert_eq!(c.incoming.recv().await.unwrap().payload, vec![i]);
        }

        let stats = hub.stats();
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.members_evicted, 1);
        assert_eq!(hub.room_members("room"), 2);

        // b gets what was queued, then its stream ends.
        for i in 0..4u8 {
            assert_eq!(b.incoming.recv().await.unwrap().payload, vec![i]);
        }
        assert!(b.incoming.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_and_leave_share_one_room() {
        let hub = LocalHub::new();
        for round in 0..200u64 {
            let room = format!("room-{round}");
            let first = hub.connect(&room, 1).await.unwrap();

            let leaving = tokio::spawn(async move { first.connection.close() });
            let joining = {
                let hub = hub.clone();
                let room = room.clone();
                tokio::spawn(async move { hub.connect(&room, 2).await.unwrap() })
            };
            leaving.await.unwrap();
            let mut second = joining.await.unwrap();
            assert_eq!(hub.room_members(&room), 1, "round {round}");

            let third = hub.connect(&room, 3).await.unwrap();
            third.connection.send(SyncMessage::update(&room, 3, vec![7])).unwrap();
            let seen = loop {
                let msg = tokio::time::timeout(Duration::from_secs(1), second.incoming.recv())
                    .await
                    .expect("frame from third member")
                    .expect("stream open");
                if msg.msg_type == MessageType::Update {
                    break msg;
                }
            };
            assert_eq!(seen.client_id, 3, "round {round}");

            second.connection.close();
            third.connection.close();
            assert_eq!(hub.room_count(), 0, "round {round}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_and_unsubscribe_share_one_topic() {
        let hub = LocalHub::new();
        for round in 0..200u64 {
            let topic = format!("file-p-{round}");
            let first = hub.subscribe(&topic).await.unwrap();

            let leaving = tokio::spawn(async move { first.channel.unsubscribe() });
            let joining = {
                let hub = hub.clone();
                let topic = topic.clone();
                tokio::spawn(async move { hub.subscribe(&topic).await.unwrap() })
            };
            leaving.await.unwrap();
            let mut second = joining.await.unwrap();

            let third = hub.subscribe(&topic).await.unwrap();
            let update = FileUpdate {
                file_id: format!("{round}"),
                content: "x".into(),
                user: Author {
                    user_id: "carol".into(),
                    username: "Carol".into(),
                    avatar_url: None,
                },
            };
            third.channel.broadcast(update.clone()).await.unwrap();
            let seen = loop {
                let event = tokio::time::timeout(Duration::from_secs(1), second.events.recv())
                    .await
                    .expect("event from third subscriber")
                    .expect("stream open");
                if let ChannelEvent::Broadcast(update) = event {
                    break update;
                }
            };
            assert_eq!(seen, update, "round {round}");
        }
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_idempotent() {
        let hub = LocalHub::new();
        let a = hub.subscribe("t").await.unwrap();
        a.channel.unsubscribe();
        a.channel.unsubscribe();
        assert!(a.channel.track(meta("x")).await.is_err());
        let stats = hub.stats();
        assert_eq!(stats.subscriptions_opened, 1);
        assert_eq!(stats.subscriptions_closed, 1);
        assert_eq!(hub.topic_count(), 0);
    }
}

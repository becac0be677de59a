//! Pub/sub contract for presence and content broadcast.
//!
//! Topics are plain strings (`"presence-{project}"`,
//! `"file-{project}-{file}"`). A subscription delivers the full presence
//! map on every membership change and every broadcast sent by other
//! subscribers.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::CollabError;
use crate::types::FileUpdate;

/// Payload a subscriber tracks on a presence topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub current_file: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub online_at: u64,
}

/// Presence key (one per subscription) to the metas tracked under it.
pub type PresenceState = HashMap<String, Vec<PresenceMeta>>;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Full membership after a change; never a delta.
    PresenceSync(PresenceState),
    Broadcast(FileUpdate),
}

pub trait RealtimeChannel: Send + Sync {
    fn topic(&self) -> &str;

    /// Announce (or replace) this subscription's presence payload.
    fn track(&self, meta: PresenceMeta) -> BoxFuture<'_, Result<(), CollabError>>;

    fn untrack(&self) -> BoxFuture<'_, Result<(), CollabError>>;

    /// Send to every other subscriber of the topic.
    fn broadcast(&self, update: FileUpdate) -> BoxFuture<'_, Result<(), CollabError>>;

    /// Drop the subscription. Idempotent.
    fn unsubscribe(&self);
}

pub struct Subscription {
    pub channel: Arc<dyn RealtimeChannel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

pub trait RealtimeClient: Send + Sync {
    /// Resolves once the subscription is confirmed.
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<Subscription, CollabError>>;
}

//! Project-level presence: who is online and which file they have open.
//!
//! ## Flow
//!
//! ```text
//! PresenceSession::join()
//!       │  subscribe "presence-{project}"
//!       ▼
//! RealtimeChannel::track(local record)
//!       │
//!       ▼   (pub/sub fan-out)
//! ChannelEvent::PresenceSync(full member map)
//!       │
//!       ▼
//! rebuild record list ──► cache + on_presence_change
//! ```
//!
//! Every sync event carries the whole membership, so the record list is
//! rebuilt from scratch each time and never patched.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::CollabError;
use crate::operation::now_millis;
use crate::realtime::{ChannelEvent, PresenceMeta, PresenceState, RealtimeChannel, RealtimeClient};
use crate::types::{presence_topic, LocalUser};

// ───────────────────────────────────────────────────────────────────
// Records
// ───────────────────────────────────────────────────────────────────

/// One announced connection in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub current_file_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub online_at: u64,
}

impl From<&PresenceMeta> for PresenceRecord {
    fn from(meta: &PresenceMeta) -> Self {
        Self {
            user_id: meta.user_id.clone(),
            username: meta.username.clone(),
            avatar_url: meta.avatar_url.clone(),
            current_file_id: meta.current_file.clone(),
            online_at: meta.online_at,
        }
    }
}

/// Flatten a membership map into records, ordered by arrival then user id.
pub fn records_from_state(state: &PresenceState) -> Vec<PresenceRecord> {
    let mut records: Vec<PresenceRecord> = state
        .values()
        .flat_map(|metas| metas.iter().map(PresenceRecord::from))
        .collect();
    records.sort_by(|a, b| {
        a.online_at
            .cmp(&b.online_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    records
}

pub type PresenceCallback = Arc<dyn Fn(Vec<PresenceRecord>) + Send + Sync>;

// ───────────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────────

/// Presence subscription for one project.
pub struct PresenceSession {
    project_id: String,
    channel: Arc<dyn RealtimeChannel>,
    meta: Mutex<PresenceMeta>,
    records: Arc<Mutex<Vec<PresenceRecord>>>,
    callback: Arc<Mutex<PresenceCallback>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    left: AtomicBool,
}

impl PresenceSession {
    /// Subscribe to the project's presence topic and announce `user`.
    pub async fn join(
        client: &dyn RealtimeClient,
        project_id: &str,
        user: &LocalUser,
        callback: PresenceCallback,
    ) -> Result<Self, CollabError> {
        let subscription = client.subscribe(&presence_topic(project_id)).await?;
        let meta = PresenceMeta {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            avatar_url: user.avatar_url.clone(),
            current_file: None,
            online_at: now_millis(),
        };

        let records = Arc::new(Mutex::new(Vec::new()));
        let callback = Arc::new(Mutex::new(callback));
        let listener = spawn_listener(
            project_id.to_string(),
            subscription.events,
            records.clone(),
            callback.clone(),
        );

        let session = Self {
            project_id: project_id.to_string(),
            channel: subscription.channel,
            meta: Mutex::new(meta),
            records,
            callback,
            listener: Mutex::new(Some(listener)),
            left: AtomicBool::new(false),
        };
        if let Err(e) = session.announce().await {
            session.leave().await;
            return Err(e);
        }
        log::info!("presence: joined project {project_id} as {}", user.user_id);
        Ok(session)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Last rebuilt record list.
    pub fn records(&self) -> Vec<PresenceRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_callback(&self, callback: PresenceCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Update the announced identity fields, keeping `current_file`.
    pub fn set_user(&self, user: &LocalUser) {
        let mut meta = self.meta.lock().unwrap_or_else(PoisonError::into_inner);
        meta.user_id = user.user_id.clone();
        meta.username = user.username.clone();
        meta.avatar_url = user.avatar_url.clone();
    }

    /// Track the current record again.
    pub async fn announce(&self) -> Result<(), CollabError> {
        let meta = self.meta.lock().unwrap_or_else(PoisonError::into_inner).clone();
        self.channel.track(meta).await
    }

    /// Re-announce with a new `current_file_id`.
    pub async fn update_editing_file(&self, file_id: Option<&str>) -> Result<(), CollabError> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner).current_file = file_id.map(str::to_string);
        self.announce().await
    }

    /// Untrack, then unsubscribe. Idempotent; failures are logged.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.channel.untrack().await {
            log::warn!("presence: untrack in {} failed: {e}", self.project_id);
        }
        self.channel.unsubscribe();
        if let Some(listener) = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take() {
            listener.abort();
        }
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clear();
        log::info!("presence: left project {}", self.project_id);
    }
}

impl Drop for PresenceSession {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take() {
            listener.abort();
        }
        self.channel.unsubscribe();
    }
}

fn spawn_listener(
    project_id: String,
    mut events: mpsc::Receiver<ChannelEvent>,
    records: Arc<Mutex<Vec<PresenceRecord>>>,
    callback: Arc<Mutex<PresenceCallback>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::PresenceSync(state) => {
                    let rebuilt = records_from_state(&state);
                    log::debug!("presence: {} members in {project_id}", rebuilt.len());
                    *records.lock().unwrap_or_else(PoisonError::into_inner) = rebuilt.clone();
                    let callback = callback.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    callback(rebuilt);
                }
                ChannelEvent::Broadcast(_) => {
                    log::trace!("presence: ignoring broadcast on {project_id}");
                }
            }
        }
    })
}

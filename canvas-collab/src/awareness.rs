//! Awareness state and cursor tracking for one file's replication room.
//!
//! ## Data flow
//!
//! ```text
//! Local cursor move
//!       │
//!       ▼
//! CursorDebouncer::push()        (coalesced, one publish per interval)
//!       │
//!       ▼
//! Awareness::set_local_cursor()  ──► SyncMessage::Awareness ──► room
//!
//! room ──► Awareness::apply_remote()   (latest clock wins per client)
//!       │
//!       ▼
//! Awareness::cursors()           (full rebuild, never incremental)
//!       │
//!       ▼
//! on_cursors_change(remote subset)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::AwarenessState;
use crate::types::{CursorState, Selection, UserIdentity};

/// A remote (or local) caret as handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub color: String,
    pub line: u32,
    pub column: u32,
    pub selection: Option<Selection>,
}

impl CursorData {
    fn from_state(identity: &UserIdentity, cursor: &CursorState) -> Self {
        Self {
            user_id: identity.id.clone(),
            username: identity.name.clone(),
            avatar_url: identity.avatar.clone(),
            color: identity.color.clone(),
            line: cursor.head.line,
            column: cursor.head.column,
            selection: cursor.selection(),
        }
    }
}

/// Result of one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorSnapshot {
    /// Every user with a cursor, the local one included.
    pub all: Vec<CursorData>,
    /// Same list without the local user; what UI callbacks receive.
    pub remote: Vec<CursorData>,
}

/// Awareness states of every connection in a room, keyed by client id.
pub struct Awareness {
    client_id: u64,
    clock: u64,
    local: Option<AwarenessState>,
    remote: HashMap<u64, (u64, AwarenessState)>,
}

impl Awareness {
    pub fn new(client_id: u64) -> Self {
        Self {
            client_id,
            clock: 0,
            local: None,
            remote: HashMap::new(),
        }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Clock of the last local change.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn local_state(&self) -> Option<&AwarenessState> {
        self.local.as_ref()
    }

    /// Publish who we are. Keeps any cursor already set.
    pub fn set_local_identity(&mut self, identity: UserIdentity) -> u64 {
        let cursor = self.local.as_ref().and_then(|s| s.cursor);
        self.local = Some(AwarenessState { identity, cursor });
        self.clock += 1;
        self.clock
    }

    /// Update the local cursor field. Ignored until an identity is set,
    /// since a cursor without identity is never shown.
    pub fn set_local_cursor(&mut self, cursor: Option<CursorState>) -> Option<u64> {
        let local = self.local.as_mut()?;
        local.cursor = cursor;
        self.clock += 1;
        Some(self.clock)
    }

    /// Drop the local state, e.g. before leaving the room.
    pub fn clear_local(&mut self) -> u64 {
        self.local = None;
        self.clock += 1;
        self.clock
    }

    /// Merge a remote state. `None` means the client cleared its state.
    ///
    /// Returns `false` when the packet is older than what we hold.
    pub fn apply_remote(&mut self, client_id: u64, clock: u64, state: Option<AwarenessState>) -> bool {
        if client_id == self.client_id {
            return false;
        }
        if let Some((current, _)) = self.remote.get(&client_id) {
            if clock < *current {
                log::trace!("awareness: stale packet from {client_id} ({clock} < {current})");
                return false;
            }
        }
        match state {
            Some(state) => {
                self.remote.insert(client_id, (clock, state));
            }
            None => {
                self.remote.remove(&client_id);
            }
        }
        true
    }

    /// Forget a client that left the room.
    pub fn remove(&mut self, client_id: u64) -> bool {
        self.remote.remove(&client_id).is_some()
    }

    pub fn remote_count(&self) -> usize {
        self.remote.len()
    }

    /// Rebuild the cursor lists from scratch.
    ///
    /// Only states carrying a cursor contribute. When one user has several
    /// connections the one with the highest client id wins, so the result
    /// does not depend on map iteration order.
    pub fn cursors(&self, local_user_id: &str) -> CursorSnapshot {
        let mut by_user: BTreeMap<&str, CursorData> = BTreeMap::new();

        let mut remote: Vec<(&u64, &AwarenessState)> =
            self.remote.iter().map(|(id, (_, state))| (id, state)).collect();
        remote.sort_by_key(|(id, _)| **id);

        let states = self.local.iter().chain(remote.into_iter().map(|(_, s)| s));
        for state in states {
            if let Some(cursor) = &state.cursor {
                by_user.insert(&state.identity.id, CursorData::from_state(&state.identity, cursor));
            }
        }

        let all: Vec<CursorData> = by_user.into_values().collect();
        let remote = all
            .iter()
            .filter(|c| c.user_id != local_user_id)
            .cloned()
            .collect();
        CursorSnapshot { all, remote }
    }
}

/// Coalesces local cursor moves so at most one publish happens per
/// interval, always with the latest value.
pub struct CursorDebouncer {
    tx: mpsc::UnboundedSender<Option<CursorState>>,
    task: JoinHandle<()>,
}

impl CursorDebouncer {
    pub fn spawn<F>(interval: Duration, publish: F) -> Self
    where
        F: Fn(Option<CursorState>) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<CursorState>>();
        let task = tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                tokio::time::sleep(interval).await;
                while let Ok(newer) = rx.try_recv() {
                    latest = newer;
                }
                publish(latest);
            }
        });
        Self { tx, task }
    }

    pub fn push(&self, cursor: Option<CursorState>) {
        let _ = self.tx.send(cursor);
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for CursorDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

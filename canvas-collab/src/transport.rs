//! Replication transport contract.
//!
//! A transport connects a client to a room and carries [`SyncMessage`]
//! frames both ways. Implementations: [`crate::hub::LocalHub`] (in-process)
//! and [`crate::client::WebSocketTransport`] (relay server).

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::CollabError;
use crate::protocol::SyncMessage;

/// Frames a member may have queued before it counts as lagging.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Outbound half of a room connection.
pub trait Connection: Send + Sync {
    /// Queue a frame for every other member of the room.
    fn send(&self, msg: SyncMessage) -> Result<(), CollabError>;

    /// Leave the room. Idempotent; sends after close fail.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A live room connection: the outbound handle plus the stream of frames
/// sent by other members.
pub struct TransportLink {
    pub connection: Arc<dyn Connection>,
    pub incoming: mpsc::Receiver<SyncMessage>,
}

pub trait ReplicationTransport: Send + Sync {
    /// Connect `client_id` to `room`. Resolves once the transport is ready
    /// to carry frames.
    fn connect(&self, room: &str, client_id: u64) -> BoxFuture<'_, Result<TransportLink, CollabError>>;
}

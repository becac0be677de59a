//! # canvas-collab: real-time collaborative editing and presence
//!
//! Several clients edit the same file at once, see each other's cursors and
//! who is online, and converge to identical text whatever order the network
//! delivers changes in.
//!
//! ## Architecture
//!
//! ```text
//!                        ┌────────────────┐
//!                        │ SessionManager │
//!                        └───────┬────────┘
//!             ┌──────────────────┴──────────────────┐
//!             ▼                                     ▼
//!   ┌──────────────────┐                  ┌──────────────────┐
//!   │ PresenceSession  │ per project      │ FileSession      │ per (project, file)
//!   │ "presence-{p}"   │                  │                  │
//!   └────────┬─────────┘                  └───┬──────┬───┬───┘
//!            │                   ┌────────────┘      │   └──────────────┐
//!            ▼                   ▼                   ▼                  ▼
//!     RealtimeClient      ReplicatedDocument   EditorBinding    RealtimeClient
//!                          (yrs) + Awareness    (TextModel)     "file-{p}-{f}"
//!                                │
//!                                ▼
//!                     ReplicationTransport
//!                  (LocalHub | WebSocketTransport ──► RelayServer)
//! ```
//!
//! ## Modules
//!
//! - [`color`]: stable per-user cursor colors
//! - [`position`]: line/column to document offset
//! - [`document`]: yrs-backed replicated text
//! - [`operation`]: programmatic edit commands
//! - [`binding`]: document to editor model adapter
//! - [`awareness`]: per-connection state and cursor tracking
//! - [`presence`], [`session`], [`manager`]: the session layer
//! - [`protocol`]: binary wire protocol (bincode-encoded SyncMessage)
//! - [`transport`], [`realtime`], [`directory`]: external boundaries
//! - [`hub`]: in-process implementation of both pub/sub and replication
//! - [`client`], [`server`]: WebSocket transport and relay server

pub mod awareness;
pub mod binding;
pub mod client;
pub mod color;
pub mod config;
pub mod directory;
pub mod document;
pub mod error;
pub mod hub;
pub mod manager;
pub mod operation;
pub mod position;
pub mod presence;
pub mod protocol;
pub mod realtime;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use awareness::{Awareness, CursorData, CursorDebouncer, CursorSnapshot};
pub use binding::{BufferEditor, BufferModel, EditorBinding, EditorHandle, TextEdit, TextModel};
pub use client::WebSocketTransport;
pub use color::{color_for, PALETTE};
pub use config::CollabConfig;
pub use directory::{CollaboratorDirectory, StaticDirectory};
pub use document::{DocumentError, ReplicatedDocument};
pub use error::CollabError;
pub use hub::{HubStats, LocalHub};
pub use manager::SessionManager;
pub use operation::{EditKind, EditOperation};
pub use position::to_offset;
pub use presence::{PresenceCallback, PresenceRecord, PresenceSession};
pub use protocol::{AwarenessPayload, AwarenessState, MessageType, ProtocolError, SyncMessage};
pub use realtime::{ChannelEvent, PresenceMeta, RealtimeChannel, RealtimeClient, Subscription};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use session::{ContentCallback, CursorsCallback, FileSession, SessionState};
pub use transport::{Connection, ReplicationTransport, TransportLink};
pub use types::{
    Author, CollaboratorRecord, CursorState, FileKey, FileUpdate, LocalUser, Position, Selection,
    UserIdentity,
};

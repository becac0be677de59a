//! Binary frames exchanged on a replication room.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬───────────┬──────────┬──────────┐
//! │ msg_type │ room      │ client_id │ clock    │ payload  │
//! │ 1 byte   │ string    │ varint    │ varint   │ variable │
//! └──────────┴───────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! `Update` and `SyncStep2` carry yrs v1 updates, `SyncStep1` a yrs state
//! vector, `Awareness` a bincode [`AwarenessPayload`] (empty payload means
//! the client cleared its state).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CursorState, UserIdentity};

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Yrs state vector, asks peers for what the sender lacks
    SyncStep1 = 1,
    /// Yrs update answering a SyncStep1
    SyncStep2 = 2,
    /// Incremental CRDT update
    Update = 3,
    /// Identity/cursor awareness state
    Awareness = 4,
    /// Client entered the room
    Join = 5,
    /// Client left the room
    Leave = 6,
    Ping = 7,
    Pong = 8,
}

/// Awareness state as it travels. Every field is optional on the wire; use
/// [`AwarenessPayload::validate`] before trusting it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessPayload {
    pub user: Option<UserIdentity>,
    pub cursor: Option<CursorState>,
}

/// Awareness state that passed validation: identity is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwarenessState {
    pub identity: UserIdentity,
    pub cursor: Option<CursorState>,
}

impl AwarenessPayload {
    /// `None` when the payload carries no usable identity.
    pub fn validate(self) -> Option<AwarenessState> {
        let identity = self.user.filter(|u| !u.id.is_empty())?;
        Some(AwarenessState {
            identity,
            cursor: self.cursor,
        })
    }
}

impl From<&AwarenessState> for AwarenessPayload {
    fn from(state: &AwarenessState) -> Self {
        Self {
            user: Some(state.identity.clone()),
            cursor: state.cursor,
        }
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub room: String,
    /// Sender connection id
    pub client_id: u64,
    /// Awareness clock; zero for document frames
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, room: &str, client_id: u64, clock: u64, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            room: room.to_string(),
            client_id,
            clock,
            payload,
        }
    }

    /// Incremental update produced by a local transaction.
    pub fn update(room: &str, client_id: u64, yrs_update: Vec<u8>) -> Self {
        Self::new(MessageType::Update, room, client_id, 0, yrs_update)
    }

    pub fn sync_step1(room: &str, client_id: u64, state_vector: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep1, room, client_id, 0, state_vector)
    }

    pub fn sync_step2(room: &str, client_id: u64, diff: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep2, room, client_id, 0, diff)
    }

    /// Awareness frame; `None` clears the sender's state.
    pub fn awareness(
        room: &str,
        client_id: u64,
        clock: u64,
        state: Option<&AwarenessState>,
    ) -> Result<Self, ProtocolError> {
        let payload = match state {
            Some(state) => encode_payload(&AwarenessPayload::from(state))?,
            None => Vec::new(),
        };
        Ok(Self::new(MessageType::Awareness, room, client_id, clock, payload))
    }

    pub fn join(room: &str, client_id: u64) -> Self {
        Self::new(MessageType::Join, room, client_id, 0, Vec::new())
    }

    pub fn leave(room: &str, client_id: u64) -> Self {
        Self::new(MessageType::Leave, room, client_id, 0, Vec::new())
    }

    pub fn ping(client_id: u64) -> Self {
        Self::new(MessageType::Ping, "", client_id, 0, Vec::new())
    }

    pub fn pong(client_id: u64) -> Self {
        Self::new(MessageType::Pong, "", client_id, 0, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_payload(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse and validate an awareness payload. `Ok(None)` means the sender
    /// cleared its state or sent nothing trustworthy.
    pub fn awareness_state(&self) -> Result<Option<AwarenessState>, ProtocolError> {
        if self.msg_type != MessageType::Awareness {
            return Err(ProtocolError::InvalidMessageType);
        }
        if self.payload.is_empty() {
            return Ok(None);
        }
        let (payload, _): (AwarenessPayload, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(payload.validate())
    }
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid message type")]
    InvalidMessageType,
}

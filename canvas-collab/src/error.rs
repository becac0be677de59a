//! Crate-level error type.

use thiserror::Error;

use crate::document::DocumentError;
use crate::protocol::ProtocolError;
use crate::types::FileKey;

#[derive(Error, Debug)]
pub enum CollabError {
    /// Replication transport refused or dropped the connection.
    #[error("transport error: {0}")]
    Transport(String),
    /// A pub/sub channel could not be subscribed or written to.
    #[error("channel error: {0}")]
    Channel(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// `leave_file` was issued while the session was still joining.
    #[error("join of {0} aborted by leave")]
    JoinAborted(FileKey),
    #[error("collaborator lookup failed: {0}")]
    Directory(String),
}

//! WebSocket replication transport for connecting to a [`crate::server::RelayServer`].
//!
//! One socket per room at `"{server_url}/{room}"`. Each connection runs a
//! writer task fed by an unbounded channel (so [`Connection::send`] never
//! blocks) and a reader task that decodes frames into the link's bounded
//! incoming stream, pausing the socket while that stream is full. When the
//! socket drops the incoming stream ends; there is no automatic reconnect.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::CollabError;
use crate::protocol::SyncMessage;
use crate::transport::{Connection, ReplicationTransport, TransportLink, DEFAULT_QUEUE_CAPACITY};

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// Connects rooms to a relay server over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    server_url: String,
}

impl WebSocketTransport {
    /// `server_url` without trailing slash, e.g. `"ws://127.0.0.1:1234"`.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn room_url(&self, room: &str) -> String {
        format!("{}/{}", self.server_url, room)
    }
}

impl ReplicationTransport for WebSocketTransport {
    fn connect(&self, room: &str, client_id: u64) -> BoxFuture<'_, Result<TransportLink, CollabError>> {
        let url = self.room_url(room);
        let room = room.to_string();
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| CollabError::Transport(format!("connect to {url} failed: {e}")))?;
            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            // Writer task: forward outgoing channel to WebSocket
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
            let writer_room = room.clone();
            tokio::spawn(async move {
                while let Some(out) = out_rx.recv().await {
                    match out {
                        Outgoing::Frame(data) => {
                            if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                                log::debug!("ws: writer for {writer_room} lost socket");
                                break;
                            }
                        }
                        Outgoing::Close => {
                            let _ = ws_writer.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            });

            // Reader task: decode frames, skip our own echoes
            let (in_tx, incoming) = mpsc::channel::<SyncMessage>(DEFAULT_QUEUE_CAPACITY);
            let reader_room = room.clone();
            let reader = tokio::spawn(async move {
                while let Some(msg) = ws_reader.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => {
                            let bytes: Vec<u8> = data.into();
                            match SyncMessage::decode(&bytes) {
                                Ok(sync_msg) if sync_msg.client_id == client_id => {}
                                Ok(sync_msg) => {
                                    if in_tx.send(sync_msg).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => log::warn!("ws: undecodable frame in {reader_room}: {e}"),
                            }
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
                log::debug!("ws: reader for {reader_room} finished");
            });

            log::info!("ws: client {client_id} connected to {url}");
            let connection = WsConnection {
                room,
                out_tx,
                reader: reader.abort_handle(),
                closed: AtomicBool::new(false),
            };
            Ok(TransportLink {
                connection: Arc::new(connection),
                incoming,
            })
        })
    }
}

struct WsConnection {
    room: String,
    out_tx: mpsc::UnboundedSender<Outgoing>,
    reader: AbortHandle,
    closed: AtomicBool,
}

impl Connection for WsConnection {
    fn send(&self, msg: SyncMessage) -> Result<(), CollabError> {
        if self.is_closed() {
            return Err(CollabError::Transport(format!("connection to {} closed", self.room)));
        }
        let encoded = msg.encode()?;
        self.out_tx
            .send(Outgoing::Frame(encoded))
            .map_err(|_| CollabError::Transport(format!("socket for {} is gone", self.room)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.out_tx.send(Outgoing::Close);
        self.reader.abort();
        log::debug!("ws: closed connection to {}", self.room);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_url() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:1234/");
        assert_eq!(transport.server_url(), "ws://127.0.0.1:1234");
        assert_eq!(transport.room_url("code-canvas-p-f"), "ws://127.0.0.1:1234/code-canvas-p-f");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 is reserved and never listening in test environments.
        let transport = WebSocketTransport::new("ws://127.0.0.1:1");
        let result = transport.connect("room", 7).await;
        assert!(matches!(result, Err(CollabError::Transport(_))));
    }
}

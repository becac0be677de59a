//! WebSocket relay server with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room ("{namespace}-{project}-{file}") ── Yrs Doc ── FanoutGroup
//! Client B ──┘                                                │
//!                                                  ┌──────────┼───────────┐
//!                                                  ▼          ▼           ▼
//!                                               Client A   Client B    Client C
//! ```
//!
//! The room is the request path of the WebSocket upgrade. Each room keeps:
//! - An authoritative Yrs doc, so a late joiner's `SyncStep1` is answered
//!   even when every other peer is idle
//! - A fan-out group relaying updates, awareness, joins and leaves
//!
//! When a socket drops, the server announces `Leave` for its client id.
//! A peer that falls `broadcast_capacity` frames behind is disconnected and
//! resyncs on its next connect.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::document::ReplicatedDocument;
use crate::hub::{Fanout, FanoutGroup};
use crate::protocol::{MessageType, SyncMessage};

/// Client id the server uses for frames it originates.
pub const SERVER_CLIENT_ID: u64 = 0;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Shared text name inside each room's document
    pub text_name: String,
    /// Frames queued per peer before it is disconnected as lagging
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1234".to_string(),
            max_peers_per_room: 100,
            text_name: "monaco".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub messages_dropped: u64,
    pub lagging_disconnects: u64,
}

/// Document room: Yrs doc + fan-out group.
struct RelayRoom {
    doc: Mutex<ReplicatedDocument>,
    group: FanoutGroup<SyncMessage>,
}

impl RelayRoom {
    fn new(config: &ServerConfig) -> Self {
        Self {
            doc: Mutex::new(ReplicatedDocument::new(&config.text_name)),
            group: FanoutGroup::new(config.broadcast_capacity),
        }
    }
}

type Rooms = Arc<RwLock<HashMap<String, Arc<RelayRoom>>>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;
/// Room name, room and client id of a joined socket.
type Member = (String, Arc<RelayRoom>, u64);

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    rooms: Rooms,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Rooms,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let mut path = String::new();
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            path = req.uri().path().trim_start_matches('/').to_string();
            Ok(resp)
        })
        .await?;
        log::info!("WebSocket connection established from {addr} for room {path:?}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Set by the first frame: which room and client id this socket is.
        let mut member: Option<Member> = None;
        let outcome = Self::relay_loop(ws_stream, addr, &path, &rooms, &stats, &config, &mut member).await;

        // Cleanup: remove member and drop an empty room under one lock, then announce leave
        if let Some((room_name, room, client_id)) = member {
            let count = {
                let mut rooms_w = rooms.write().await;
                room.group.remove_member(client_id);
                if room.group.member_count() == 0
                    && rooms_w.get(&room_name).is_some_and(|current| Arc::ptr_eq(current, &room))
                {
                    rooms_w.remove(&room_name);
                    log::info!("Room {room_name} removed (empty)");
                }
                rooms_w.len()
            };
            let fanout = room.group.broadcast_from(None, &SyncMessage::leave(&room_name, client_id));
            Self::record_fanout(&stats, fanout).await;
            stats.write().await.active_rooms = count;
        }
        stats.write().await.active_connections -= 1;

        outcome
    }

    /// Process frames until the socket closes or fails.
    async fn relay_loop(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        path: &str,
        rooms: &Rooms,
        stats: &RwLock<ServerStats>,
        config: &ServerConfig,
        member: &mut Option<Member>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut relay_rx: Option<mpsc::Receiver<SyncMessage>> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            if member.is_none() {
                                let room_name = if path.is_empty() { sync_msg.room.clone() } else { path.to_string() };
                                // Capacity check and join happen under the rooms lock so a
                                // concurrent cleanup cannot drop the room in between.
                                let (room, admitted, count) = {
                                    let mut rooms_w = rooms.write().await;
                                    let room = rooms_w
                                        .entry(room_name.clone())
                                        .or_insert_with(|| Arc::new(RelayRoom::new(config)))
                                        .clone();
                                    let admitted = if room.group.member_count() < config.max_peers_per_room {
                                        Some(room.group.add_member(sync_msg.client_id))
                                    } else {
                                        if room.group.member_count() == 0 {
                                            rooms_w.remove(&room_name);
                                        }
                                        None
                                    };
                                    (room, admitted, rooms_w.len())
                                };
                                stats.write().await.active_rooms = count;
                                let Some(rx) = admitted else {
                                    log::warn!("Room {room_name} full, rejecting {addr}");
                                    stats.write().await.rejected_connections += 1;
                                    ws_sender.send(Message::Close(None)).await?;
                                    return Ok(());
                                };
                                relay_rx = Some(rx);
                                log::info!("Client {} joined room {room_name}", sync_msg.client_id);
                                *member = Some((room_name, room, sync_msg.client_id));
                            }
                            let Some((room_name, room, client_id)) = member.as_ref() else { continue };

                            match sync_msg.msg_type {
                                MessageType::SyncStep1 => {
                                    let diff = room
                                        .doc
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner)
                                        .encode_diff(&sync_msg.payload);
                                    match diff {
                                        Ok(diff) => {
                                            let response = SyncMessage::sync_step2(room_name, SERVER_CLIENT_ID, diff);
                                            ws_sender.send(Message::Binary(response.encode()?.into())).await?;
                                        }
                                        Err(e) => log::warn!("Bad state vector from {client_id}: {e}"),
                                    }
                                }
                                MessageType::Update | MessageType::SyncStep2 => {
                                    let applied = room
                                        .doc
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner)
                                        .apply_update(&sync_msg.payload);
                                    match applied {
                                        Ok(()) => {
                                            let fanout = room.group.broadcast_from(Some(*client_id), &sync_msg);
                                            Self::record_fanout(stats, fanout).await;
                                        }
                                        Err(e) => log::warn!("Rejected update from {client_id} in {room_name}: {e}"),
                                    }
                                }
                                MessageType::Awareness | MessageType::Join | MessageType::Leave => {
                                    log::trace!("Relaying {:?} from {client_id} in {room_name}", sync_msg.msg_type);
                                    let fanout = room.group.broadcast_from(Some(*client_id), &sync_msg);
                                    Self::record_fanout(stats, fanout).await;
                                }
                                MessageType::Ping => {
                                    let pong = SyncMessage::pong(SERVER_CLIENT_ID);
                                    ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
                                }
                                MessageType::Pong => {}
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            return Ok(());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            return Ok(());
                        }

                        _ => {}
                    }
                }

                // Frames relayed from other members
                msg = async {
                    if let Some(ref mut rx) = relay_rx {
                        rx.recv().await
                    } else {
                        // Not in a room yet, wait forever
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Some(relayed) => {
                            ws_sender.send(Message::Binary(relayed.encode()?.into())).await?;
                        }
                        None => {
                            log::warn!("Disconnecting lagging peer {addr}");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn record_fanout(stats: &RwLock<ServerStats>, fanout: Fanout) {
        if fanout.dropped > 0 {
            let mut s = stats.write().await;
            s.messages_dropped += fanout.dropped;
            s.lagging_disconnects += fanout.evicted;
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Authoritative text of a room, if it is open.
    pub async fn room_text(&self, room: &str) -> Option<String> {
        let room = self.rooms.read().await.get(room).cloned()?;
        let text = room.doc.lock().unwrap_or_else(PoisonError::into_inner).text();
        Some(text)
    }

    pub async fn room_members(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map_or(0, |r| r.group.member_count())
    }
}

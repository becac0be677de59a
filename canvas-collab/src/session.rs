//! One open file shared with collaborators.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──join()──► Joining ──connect resolved──► Active ──dispose()──► Leaving ──► Disposed
//!                     │                                                   ▲
//!                     └──────────────dispose() (join aborts)──────────────┘
//! ```
//!
//! The session owns its document. The pump task, the debouncer and the
//! editor binding only hold `Weak` references, so once [`FileSession::dispose`]
//! runs nothing can touch the document again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::awareness::{Awareness, CursorData, CursorDebouncer};
use crate::binding::{EditorBinding, EditorHandle, UpdateSink};
use crate::config::CollabConfig;
use crate::document::ReplicatedDocument;
use crate::error::CollabError;
use crate::operation::EditOperation;
use crate::protocol::{MessageType, SyncMessage};
use crate::realtime::{ChannelEvent, RealtimeChannel, RealtimeClient};
use crate::transport::{Connection, ReplicationTransport};
use crate::types::{Author, CursorState, FileKey, FileUpdate, LocalUser, Position, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Joining,
    Active,
    Leaving,
    Disposed,
}

pub type ContentCallback = Arc<dyn Fn(FileUpdate) + Send + Sync>;
pub type CursorsCallback = Arc<dyn Fn(Vec<CursorData>) + Send + Sync>;

/// Everything a session attaches while joining, released by `dispose`.
struct Attached {
    state: SessionState,
    document: Option<Arc<Mutex<ReplicatedDocument>>>,
    connection: Option<Arc<dyn Connection>>,
    binding: Option<Arc<EditorBinding>>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    debouncer: Option<CursorDebouncer>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct FileSession {
    key: FileKey,
    room: String,
    client_id: u64,
    user: LocalUser,
    config: CollabConfig,
    editor: Arc<dyn EditorHandle>,
    on_content: ContentCallback,
    on_cursors: CursorsCallback,
    attached: Mutex<Attached>,
    awareness: Mutex<Awareness>,
    cursors: Mutex<Vec<CursorData>>,
    connection_lost: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FileSession {
    pub fn new(
        key: FileKey,
        user: LocalUser,
        config: CollabConfig,
        editor: Arc<dyn EditorHandle>,
        on_content: ContentCallback,
        on_cursors: CursorsCallback,
    ) -> Self {
        let client_id = Uuid::new_v4().as_u64_pair().0;
        Self {
            room: key.room(&config.room_namespace),
            key,
            client_id,
            user,
            config,
            editor,
            on_content,
            on_cursors,
            attached: Mutex::new(Attached {
                state: SessionState::Idle,
                document: None,
                connection: None,
                binding: None,
                channel: None,
                debouncer: None,
                tasks: Vec::new(),
            }),
            awareness: Mutex::new(Awareness::new(client_id)),
            cursors: Mutex::new(Vec::new()),
            connection_lost: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &FileKey {
        &self.key
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn state(&self) -> SessionState {
        lock(&self.attached).state
    }

    /// Cursor cache, local user included.
    pub fn cursors(&self) -> Vec<CursorData> {
        lock(&self.cursors).clone()
    }

    /// Set once the replication stream ended while the session was active.
    pub fn connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::Acquire)
    }

    /// Current document text, `None` once disposed.
    pub fn text(&self) -> Option<String> {
        let document = lock(&self.attached).document.clone()?;
        let text = lock(&document).text();
        Some(text)
    }

    /// Store a freshly attached resource, unless a leave got here first.
    fn attach(&self, f: impl FnOnce(&mut Attached)) -> Result<(), CollabError> {
        let mut attached = lock(&self.attached);
        if attached.state != SessionState::Joining {
            log::info!("session {}: join aborted by leave", self.key);
            return Err(CollabError::JoinAborted(self.key.clone()));
        }
        f(&mut attached);
        Ok(())
    }

    /// Connect, bind and subscribe. Resolves once the session is active.
    ///
    /// A concurrent [`dispose`](Self::dispose) makes this return
    /// [`CollabError::JoinAborted`] at the next suspension point, after
    /// releasing whatever it had attached.
    pub async fn join(
        self: &Arc<Self>,
        transport: &dyn ReplicationTransport,
        realtime: &dyn RealtimeClient,
    ) -> Result<(), CollabError> {
        {
            let mut attached = lock(&self.attached);
            if attached.state != SessionState::Idle {
                return Err(CollabError::JoinAborted(self.key.clone()));
            }
            attached.state = SessionState::Joining;
        }
        log::info!("session {}: joining room {}", self.key, self.room);

        let document = Arc::new(Mutex::new(ReplicatedDocument::new(&self.config.text_name)));
        self.attach(|a| a.document = Some(document.clone()))?;

        let link = transport.connect(&self.room, self.client_id).await?;
        let connection = link.connection;
        if let Err(e) = self.attach(|a| a.connection = Some(connection.clone())) {
            connection.close();
            return Err(e);
        }

        let sink: UpdateSink = {
            let connection = connection.clone();
            let room = self.room.clone();
            let client_id = self.client_id;
            Arc::new(move |update| {
                if let Err(e) = connection.send(SyncMessage::update(&room, client_id, update)) {
                    log::warn!("binding: dropping local update: {e}");
                }
            })
        };
        let binding = Arc::new(EditorBinding::attach(&document, self.editor.as_ref(), sink));
        if let Err(e) = self.attach(|a| a.binding = Some(binding.clone())) {
            binding.detach();
            return Err(e);
        }

        {
            let mut awareness = lock(&self.awareness);
            awareness.set_local_identity(self.user.identity());
            awareness.set_local_cursor(self.editor.cursor());
        }
        self.send(SyncMessage::join(&self.room, self.client_id));
        let state_vector = lock(&document).state_vector();
        self.send(SyncMessage::sync_step1(&self.room, self.client_id, state_vector));
        self.send_awareness();

        let weak = Arc::downgrade(self);
        let debouncer = CursorDebouncer::spawn(self.config.cursor_debounce, move |cursor| {
            if let Some(session) = weak.upgrade() {
                session.publish_cursor(cursor);
            }
        });
        self.attach(|a| a.debouncer = Some(debouncer))?;

        let subscription = realtime.subscribe(&self.key.content_topic()).await?;
        let channel = subscription.channel;
        if let Err(e) = self.attach(|a| a.channel = Some(channel.clone())) {
            channel.unsubscribe();
            return Err(e);
        }

        let pump = spawn_pump(Arc::downgrade(self), link.incoming);
        let listener = spawn_content_listener(
            self.key.clone(),
            self.user.user_id.clone(),
            self.on_content.clone(),
            subscription.events,
        );
        let handles = [pump.abort_handle(), listener.abort_handle()];
        let activated = self.attach(|a| {
            a.tasks.push(pump);
            a.tasks.push(listener);
            a.state = SessionState::Active;
        });
        if let Err(e) = activated {
            handles.iter().for_each(|h| h.abort());
            return Err(e);
        }

        self.rebuild_cursors();
        log::info!("session {}: active as client {}", self.key, self.client_id);
        Ok(())
    }

    /// Release everything in a fixed order: binding, document, transport,
    /// content channel, cursor cache. Idempotent.
    pub fn dispose(&self) {
        let mut released = {
            let mut attached = lock(&self.attached);
            match attached.state {
                SessionState::Leaving | SessionState::Disposed => return,
                _ => attached.state = SessionState::Leaving,
            }
            Attached {
                state: SessionState::Leaving,
                document: attached.document.take(),
                connection: attached.connection.take(),
                binding: attached.binding.take(),
                channel: attached.channel.take(),
                debouncer: attached.debouncer.take(),
                tasks: std::mem::take(&mut attached.tasks),
            }
        };
        log::info!("session {}: leaving", self.key);

        if let Some(debouncer) = released.debouncer.take() {
            debouncer.stop();
        }
        for task in released.tasks.drain(..) {
            task.abort();
        }
        if let Some(binding) = released.binding.take() {
            binding.detach();
        }
        drop(released.document.take());

        if let Some(connection) = released.connection.take() {
            let clock = lock(&self.awareness).clear_local();
            match SyncMessage::awareness(&self.room, self.client_id, clock, None) {
                Ok(msg) => {
                    if let Err(e) = connection.send(msg) {
                        log::debug!("session {}: awareness clear not sent: {e}", self.key);
                    }
                }
                Err(e) => log::warn!("session {}: {e}", self.key),
            }
            connection.close();
        }
        if let Some(channel) = released.channel.take() {
            channel.unsubscribe();
        }
        lock(&self.cursors).clear();

        lock(&self.attached).state = SessionState::Disposed;
        log::info!("session {}: disposed", self.key);
    }

    fn active_document(&self) -> Option<Arc<Mutex<ReplicatedDocument>>> {
        let attached = lock(&self.attached);
        match attached.state {
            SessionState::Joining | SessionState::Active => attached.document.clone(),
            _ => None,
        }
    }

    fn send(&self, msg: SyncMessage) {
        let connection = lock(&self.attached).connection.clone();
        let Some(connection) = connection else { return };
        if let Err(e) = connection.send(msg) {
            log::warn!("session {}: send failed: {e}", self.key);
        }
    }

    fn send_awareness(&self) {
        let msg = {
            let awareness = lock(&self.awareness);
            SyncMessage::awareness(&self.room, self.client_id, awareness.clock(), awareness.local_state())
        };
        match msg {
            Ok(msg) => self.send(msg),
            Err(e) => log::warn!("session {}: awareness not encoded: {e}", self.key),
        }
    }

    /// Change the document through the editor binding, so keystrokes still
    /// in flight land before `f` and the editor shows the result.
    fn with_document<R>(&self, f: impl FnOnce(&mut ReplicatedDocument) -> R) -> Option<R> {
        let (document, binding) = {
            let attached = lock(&self.attached);
            if !matches!(attached.state, SessionState::Joining | SessionState::Active) {
                return None;
            }
            (attached.document.clone()?, attached.binding.clone())
        };
        match binding {
            Some(binding) => binding.transact(f),
            None => Some(f(&mut *lock(&document))),
        }
    }

    /// Full rebuild of the cursor list; the callback gets remote cursors only.
    fn rebuild_cursors(&self) {
        let snapshot = lock(&self.awareness).cursors(&self.user.user_id);
        *lock(&self.cursors) = snapshot.all;
        (self.on_cursors)(snapshot.remote);
    }

    fn publish_cursor(&self, cursor: Option<CursorState>) {
        if self.state() != SessionState::Active {
            return;
        }
        if lock(&self.awareness).set_local_cursor(cursor).is_none() {
            return;
        }
        self.send_awareness();
        self.rebuild_cursors();
    }

    /// Queue a local cursor move; published after the debounce interval.
    pub fn update_cursor(&self, position: Position, selection: Option<Selection>) {
        let attached = lock(&self.attached);
        if let Some(debouncer) = attached.debouncer.as_ref() {
            debouncer.push(Some(CursorState::from_selection(position, selection)));
        }
    }

    /// Apply a programmatic edit as one transaction and ship the update.
    /// Returns `false` if the operation changed nothing.
    pub fn apply_edit(&self, operation: &EditOperation) -> Result<bool, CollabError> {
        let Some(update) = self.with_document(|doc| operation.apply_to(doc)) else {
            return Ok(false);
        };
        let Some(update) = update? else {
            log::debug!("session {}: edit by {} was a no-op", self.key, operation.user_id);
            return Ok(false);
        };
        self.send(SyncMessage::update(&self.room, self.client_id, update));
        Ok(true)
    }

    /// Publish the whole content on the fallback broadcast channel.
    pub async fn broadcast(&self, content: &str, author: Author) -> Result<(), CollabError> {
        let channel = lock(&self.attached).channel.clone();
        let Some(channel) = channel else {
            return Err(CollabError::Channel(format!("{} has no content channel", self.key)));
        };
        channel
            .broadcast(FileUpdate {
                file_id: self.key.file_id.clone(),
                content: content.to_string(),
                user: author,
            })
            .await
    }

    fn handle_incoming(&self, msg: SyncMessage) {
        if !msg.room.is_empty() && msg.room != self.room {
            log::trace!("session {}: frame for room {} ignored", self.key, msg.room);
            return;
        }
        match msg.msg_type {
            MessageType::SyncStep1 => {
                let Some(document) = self.active_document() else { return };
                let diff = lock(&document).encode_diff(&msg.payload);
                match diff {
                    Ok(diff) => self.send(SyncMessage::sync_step2(&self.room, self.client_id, diff)),
                    Err(e) => log::warn!("session {}: bad state vector from {}: {e}", self.key, msg.client_id),
                }
            }
            MessageType::SyncStep2 | MessageType::Update => {
                let Some(applied) = self.with_document(|doc| doc.apply_update(&msg.payload)) else { return };
                if let Err(e) = applied {
                    log::warn!("session {}: update from {} rejected: {e}", self.key, msg.client_id);
                }
            }
            MessageType::Awareness => match msg.awareness_state() {
                Ok(state) => {
                    let changed = lock(&self.awareness).apply_remote(msg.client_id, msg.clock, state);
                    if changed {
                        self.rebuild_cursors();
                    }
                }
                Err(e) => log::warn!("session {}: bad awareness from {}: {e}", self.key, msg.client_id),
            },
            MessageType::Join => {
                log::debug!("session {}: peer {} joined", self.key, msg.client_id);
                self.send_awareness();
                if let Some(document) = self.active_document() {
                    let state_vector = lock(&document).state_vector();
                    self.send(SyncMessage::sync_step1(&self.room, self.client_id, state_vector));
                }
            }
            MessageType::Leave => {
                log::debug!("session {}: peer {} left", self.key, msg.client_id);
                if lock(&self.awareness).remove(msg.client_id) {
                    self.rebuild_cursors();
                }
            }
            MessageType::Ping => self.send(SyncMessage::pong(self.client_id)),
            MessageType::Pong => {}
        }
    }

    fn stream_ended(&self) {
        if self.state() == SessionState::Active {
            log::warn!("session {}: replication stream ended, not reconnecting", self.key);
            self.connection_lost.store(true, Ordering::Release);
        }
    }
}

impl Drop for FileSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_pump(session: Weak<FileSession>, mut incoming: mpsc::Receiver<SyncMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = incoming.recv().await {
            let Some(session) = session.upgrade() else { return };
            session.handle_incoming(msg);
        }
        if let Some(session) = session.upgrade() {
            session.stream_ended();
        }
    })
}

fn spawn_content_listener(
    key: FileKey,
    local_user_id: String,
    on_content: ContentCallback,
    mut events: mpsc::Receiver<ChannelEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ChannelEvent::Broadcast(update) = event {
                if update.user.user_id == local_user_id {
                    continue;
                }
                log::debug!("session {key}: content broadcast from {}", update.user.user_id);
                on_content(update);
            }
        }
    })
}

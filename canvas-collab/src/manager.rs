//! Entry point for the editor: one [`SessionManager`] per process, injected
//! wherever collaboration is needed.
//!
//! Holds a presence session per joined project and a file session per
//! joined [`FileKey`]. Sessions are independent; leaving one never touches
//! another, except that leaving a project also leaves its files.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::awareness::CursorData;
use crate::binding::EditorHandle;
use crate::config::CollabConfig;
use crate::directory::CollaboratorDirectory;
use crate::error::CollabError;
use crate::operation::EditOperation;
use crate::presence::{PresenceCallback, PresenceRecord, PresenceSession};
use crate::realtime::RealtimeClient;
use crate::session::{ContentCallback, CursorsCallback, FileSession, SessionState};
use crate::transport::ReplicationTransport;
use crate::types::{Author, CollaboratorRecord, FileKey, LocalUser, Position, Selection};

pub struct SessionManager {
    config: CollabConfig,
    transport: Arc<dyn ReplicationTransport>,
    realtime: Arc<dyn RealtimeClient>,
    directory: Arc<dyn CollaboratorDirectory>,
    projects: Mutex<HashMap<String, Arc<PresenceSession>>>,
    files: Mutex<HashMap<FileKey, Arc<FileSession>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionManager {
    pub fn new(
        config: CollabConfig,
        transport: Arc<dyn ReplicationTransport>,
        realtime: Arc<dyn RealtimeClient>,
        directory: Arc<dyn CollaboratorDirectory>,
    ) -> Self {
        Self {
            config,
            transport,
            realtime,
            directory,
            projects: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    fn project(&self, project_id: &str) -> Option<Arc<PresenceSession>> {
        lock(&self.projects).get(project_id).cloned()
    }

    fn file(&self, key: &FileKey) -> Option<Arc<FileSession>> {
        lock(&self.files).get(key).cloned()
    }

    // ─── presence ───────────────────────────────────────────────────

    /// Announce `user` in the project and start delivering presence lists.
    ///
    /// Joining an already joined project re-announces and swaps the callback.
    pub async fn join_project(
        &self,
        project_id: &str,
        user: &LocalUser,
        on_presence_change: PresenceCallback,
    ) -> Result<(), CollabError> {
        if let Some(existing) = self.project(project_id) {
            log::debug!("manager: project {project_id} already joined, re-announcing");
            existing.set_callback(on_presence_change);
            existing.set_user(user);
            return existing.announce().await;
        }

        let session = PresenceSession::join(self.realtime.as_ref(), project_id, user, on_presence_change)
            .await
            .map_err(|e| {
                log::error!("manager: joining project {project_id} failed: {e}");
                e
            })?;
        let replaced = lock(&self.projects).insert(project_id.to_string(), Arc::new(session));
        if let Some(replaced) = replaced {
            replaced.leave().await;
        }
        Ok(())
    }

    /// Re-announce with the file the user now has open (`None` for none).
    pub async fn update_editing_file(
        &self,
        project_id: &str,
        user_id: &str,
        file_id: Option<&str>,
    ) -> Result<(), CollabError> {
        let Some(session) = self.project(project_id) else {
            log::warn!("manager: update_editing_file for {user_id} in unjoined project {project_id}");
            return Ok(());
        };
        session.update_editing_file(file_id).await
    }

    /// Presence cache for a project; empty if not joined.
    pub fn collaborators(&self, project_id: &str) -> Vec<PresenceRecord> {
        self.project(project_id).map(|s| s.records()).unwrap_or_default()
    }

    pub async fn leave_project(&self, project_id: &str) {
        let session = lock(&self.projects).remove(project_id);
        if let Some(session) = session {
            session.leave().await;
        }

        let files: Vec<Arc<FileSession>> = {
            let mut files = lock(&self.files);
            let keys: Vec<FileKey> = files
                .keys()
                .filter(|k| k.project_id == project_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| files.remove(k)).collect()
        };
        for session in files {
            session.dispose();
        }
        log::info!("manager: left project {project_id}");
    }

    // ─── files ──────────────────────────────────────────────────────

    /// Open a collaborative session on one file, bound to `editor`.
    ///
    /// Any previous session for the same file is left first.
    pub async fn join_file(
        &self,
        project_id: &str,
        file_id: &str,
        user: &LocalUser,
        editor: Arc<dyn EditorHandle>,
        on_content_change: ContentCallback,
        on_cursors_change: CursorsCallback,
    ) -> Result<(), CollabError> {
        let key = FileKey::new(project_id, file_id);
        let session = Arc::new(FileSession::new(
            key.clone(),
            user.clone(),
            self.config.clone(),
            editor,
            on_content_change,
            on_cursors_change,
        ));

        let previous = lock(&self.files).insert(key.clone(), session.clone());
        if let Some(previous) = previous {
            log::info!("manager: replacing existing session for {key}");
            previous.dispose();
        }

        match session.join(self.transport.as_ref(), self.realtime.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                {
                    let mut files = lock(&self.files);
                    if files.get(&key).is_some_and(|s| Arc::ptr_eq(s, &session)) {
                        files.remove(&key);
                    }
                }
                session.dispose();
                match &e {
                    CollabError::JoinAborted(_) => log::info!("manager: join of {key} cancelled"),
                    _ => log::error!("manager: joining {key} failed: {e}"),
                }
                Err(e)
            }
        }
    }

    pub async fn leave_file(&self, project_id: &str, file_id: &str) {
        let key = FileKey::new(project_id, file_id);
        let session = lock(&self.files).remove(&key);
        match session {
            Some(session) => session.dispose(),
            None => log::debug!("manager: leave_file for {key}, nothing joined"),
        }
    }

    /// Whole-content broadcast on the file's fallback channel.
    pub async fn broadcast_file_change(
        &self,
        project_id: &str,
        file_id: &str,
        content: &str,
        author: Author,
    ) -> Result<(), CollabError> {
        let key = FileKey::new(project_id, file_id);
        let Some(session) = self.file(&key) else {
            log::warn!("manager: broadcast for unjoined file {key}");
            return Ok(());
        };
        session.broadcast(content, author).await
    }

    pub async fn apply_edit_operation(
        &self,
        project_id: &str,
        file_id: &str,
        operation: &EditOperation,
    ) -> Result<(), CollabError> {
        let key = FileKey::new(project_id, file_id);
        let Some(session) = self.file(&key) else {
            log::warn!("manager: edit for unjoined file {key}");
            return Ok(());
        };
        session.apply_edit(operation).map(|_| ())
    }

    /// Publish the local caret (and selection) for a file, debounced.
    pub fn update_cursor(&self, project_id: &str, file_id: &str, position: Position, selection: Option<Selection>) {
        let key = FileKey::new(project_id, file_id);
        match self.file(&key) {
            Some(session) => session.update_cursor(position, selection),
            None => log::warn!("manager: cursor update for unjoined file {key}"),
        }
    }

    /// Cursor cache for a file; empty if not joined.
    pub fn cursors(&self, project_id: &str, file_id: &str) -> Vec<CursorData> {
        self.file(&FileKey::new(project_id, file_id))
            .map(|s| s.cursors())
            .unwrap_or_default()
    }

    /// `None` means no session is registered (idle).
    pub fn file_state(&self, project_id: &str, file_id: &str) -> Option<SessionState> {
        self.file(&FileKey::new(project_id, file_id)).map(|s| s.state())
    }

    pub fn connection_lost(&self, project_id: &str, file_id: &str) -> bool {
        self.file(&FileKey::new(project_id, file_id))
            .is_some_and(|s| s.connection_lost())
    }

    /// Current replicated text of a joined file.
    pub fn file_text(&self, project_id: &str, file_id: &str) -> Option<String> {
        self.file(&FileKey::new(project_id, file_id))?.text()
    }

    // ─── directory ──────────────────────────────────────────────────

    /// Whether anyone besides the owner was invited. Lookup failures count
    /// as `false`.
    pub async fn is_collaborative_project(&self, project_id: &str) -> bool {
        match self.directory.collaborators(project_id).await {
            Ok(records) => !records.is_empty(),
            Err(e) => {
                log::warn!("manager: collaborator check for {project_id} failed: {e}");
                false
            }
        }
    }

    pub async fn project_collaborators(&self, project_id: &str) -> Vec<CollaboratorRecord> {
        self.directory
            .collaborators(project_id)
            .await
            .unwrap_or_else(|e| {
                log::warn!("manager: collaborator listing for {project_id} failed: {e}");
                Vec::new()
            })
    }

    /// Leave every project and file.
    pub async fn shutdown(&self) {
        let projects: Vec<String> = lock(&self.projects).keys().cloned().collect();
        for project_id in projects {
            self.leave_project(&project_id).await;
        }
        let files: Vec<Arc<FileSession>> = lock(&self.files).drain().map(|(_, s)| s).collect();
        for session in files {
            session.dispose();
        }
        log::info!("manager: shut down");
    }
}

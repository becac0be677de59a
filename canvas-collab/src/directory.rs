//! Collaborator listing, backed by the storage layer in production.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::CollabError;
use crate::types::CollaboratorRecord;

pub trait CollaboratorDirectory: Send + Sync {
    fn collaborators(&self, project_id: &str) -> BoxFuture<'_, Result<Vec<CollaboratorRecord>, CollabError>>;
}

/// In-memory directory.
#[derive(Default)]
pub struct StaticDirectory {
    projects: RwLock<HashMap<String, Vec<CollaboratorRecord>>>,
    unavailable: RwLock<bool>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, project_id: &str, record: CollaboratorRecord) {
        if let Ok(mut projects) = self.projects.write() {
            projects.entry(project_id.to_string()).or_default().push(record);
        }
    }

    /// Make every lookup fail, as a backend outage would.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.write() {
            *flag = unavailable;
        }
    }
}

impl CollaboratorDirectory for StaticDirectory {
    fn collaborators(&self, project_id: &str) -> BoxFuture<'_, Result<Vec<CollaboratorRecord>, CollabError>> {
        let result = if self.unavailable.read().map_or(true, |flag| *flag) {
            Err(CollabError::Directory("directory unavailable".into()))
        } else {
            Ok(self
                .projects
                .read()
                .map(|p| p.get(project_id).cloned().unwrap_or_default())
                .unwrap_or_default())
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user_id: &str) -> CollaboratorRecord {
        CollaboratorRecord {
            user_id: user_id.into(),
            username: user_id.to_uppercase(),
            avatar_url: None,
            permission: "write".into(),
        }
    }

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let dir = StaticDirectory::new();
        dir.add("p1", record("a"));
        dir.add("p1", record("b"));

        assert_eq!(dir.collaborators("p1").await.unwrap().len(), 2);
        assert!(dir.collaborators("p2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_directory_outage() {
        let dir = StaticDirectory::new();
        dir.set_unavailable(true);
        assert!(dir.collaborators("p1").await.is_err());
    }
}

//! Value types shared by the collaboration components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one open file inside one project.
///
/// Used as a hash-map key instead of a `"{project}-{file}"` string so ids that
/// contain the delimiter cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    pub project_id: String,
    pub file_id: String,
}

impl FileKey {
    pub fn new(project_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            file_id: file_id.into(),
        }
    }

    /// Replication room for this file, `"{namespace}-{project}-{file}"`.
    pub fn room(&self, namespace: &str) -> String {
        format!("{namespace}-{}-{}", self.project_id, self.file_id)
    }

    /// Content broadcast topic, `"file-{project}-{file}"`.
    pub fn content_topic(&self) -> String {
        format!("file-{}-{}", self.project_id, self.file_id)
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.file_id)
    }
}

/// Presence topic for a project, `"presence-{project}"`.
pub fn presence_topic(project_id: &str) -> String {
    format!("presence-{project_id}")
}

/// 0-based line/column coordinate inside a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Selected range as shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

/// Cursor as published over awareness: `head` is the caret, `anchor` the
/// fixed end of a selection if there is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub head: Position,
    pub anchor: Option<Position>,
}

impl CursorState {
    pub fn caret(head: Position) -> Self {
        Self { head, anchor: None }
    }

    /// Build from a caret position plus an optional UI selection; the
    /// selection start becomes the anchor.
    pub fn from_selection(head: Position, selection: Option<Selection>) -> Self {
        Self {
            head,
            anchor: selection.map(|s| Position::new(s.start_line, s.start_column)),
        }
    }

    pub fn selection(&self) -> Option<Selection> {
        self.anchor.map(|anchor| Selection {
            start_line: anchor.line,
            start_column: anchor.column,
            end_line: self.head.line,
            end_column: self.head.column,
        })
    }
}

/// Who a connection belongs to, as published in awareness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub color: String,
}

/// The user on whose behalf this process joins projects and files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl LocalUser {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, avatar_url: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            avatar_url,
        }
    }

    /// Awareness identity, colored from the user id.
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.user_id.clone(),
            name: self.username.clone(),
            avatar: self.avatar_url.clone(),
            color: crate::color::color_for(&self.user_id).to_string(),
        }
    }

    pub fn author(&self) -> Author {
        Author {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Author attached to a content broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Whole-content change event on the fallback broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    pub file_id: String,
    pub content: String,
    pub user: Author,
}

/// Row returned by the collaborator directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorRecord {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub permission: String,
}

//! Programmatic edit commands.

use serde::{Deserialize, Serialize};

use crate::document::{DocumentError, ReplicatedDocument};
use crate::position::to_offset;
use crate::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

/// One edit issued outside the editor binding, e.g. a programmatic patch.
///
/// `text` is required for inserts and replaces, `length` for deletes and
/// replaces; an operation missing what its kind needs is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    #[serde(rename = "type")]
    pub kind: EditKind,
    pub position: Position,
    pub text: Option<String>,
    pub length: Option<u32>,
    pub user_id: String,
    pub timestamp: u64,
}

impl EditOperation {
    pub fn insert(position: Position, text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind: EditKind::Insert,
            position,
            text: Some(text.into()),
            length: None,
            user_id: user_id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn delete(position: Position, length: u32, user_id: impl Into<String>) -> Self {
        Self {
            kind: EditKind::Delete,
            position,
            text: None,
            length: Some(length),
            user_id: user_id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn replace(
        position: Position,
        length: u32,
        text: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: EditKind::Replace,
            position,
            text: Some(text.into()),
            length: Some(length),
            user_id: user_id.into(),
            timestamp: now_millis(),
        }
    }

    /// Resolve against `text`: `(offset, delete_len, insert)`, or `None`
    /// when the operation lacks the fields its kind requires.
    ///
    /// The delete length is clamped to what remains after the offset.
    pub fn resolve(&self, text: &str) -> Option<(u32, u32, String)> {
        let non_empty_text = self.text.as_deref().filter(|t| !t.is_empty());
        let non_zero_len = self.length.filter(|&l| l > 0);
        let (len, insert) = match self.kind {
            EditKind::Insert => (0, non_empty_text?),
            EditKind::Delete => (non_zero_len?, ""),
            EditKind::Replace => (non_zero_len?, non_empty_text?),
        };
        let offset = to_offset(text, self.position);
        let len = len.min(text.len() as u32 - offset);
        let len = clamp_to_char_boundary(text, offset, len);
        Some((offset, len, insert.to_string()))
    }

    /// Apply as one transaction on `doc`. Returns the update to broadcast,
    /// or `None` if the operation was a no-op.
    pub fn apply_to(&self, doc: &mut ReplicatedDocument) -> Result<Option<Vec<u8>>, DocumentError> {
        doc.transact_with(|text| self.resolve(text))
    }
}

/// Shrink `len` so `offset + len` does not split a multibyte character.
pub(crate) fn clamp_to_char_boundary(text: &str, offset: u32, len: u32) -> u32 {
    let mut end = (offset + len) as usize;
    while end > offset as usize && !text.is_char_boundary(end) {
        end -= 1;
    }
    end as u32 - offset
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(text: &str) -> ReplicatedDocument {
        let mut doc = ReplicatedDocument::new("monaco");
        doc.insert(0, text).unwrap();
        doc
    }

    #[test]
    fn test_insert_at_end_of_line() {
        let mut doc = doc_with("hello");
        let op = EditOperation::insert(Position::new(0, 5), "!", "u1");
        assert!(op.apply_to(&mut doc).unwrap().is_some());
        assert_eq!(doc.text(), "hello!");
    }

    #[test]
    fn test_delete_on_second_line() {
        let mut doc = doc_with("one\ntwo three");
        let op = EditOperation::delete(Position::new(1, 3), 6, "u1");
        op.apply_to(&mut doc).unwrap();
        assert_eq!(doc.text(), "one\ntwo");
    }

    #[test]
    fn test_replace() {
        let mut doc = doc_with("let x = 1;");
        let op = EditOperation::replace(Position::new(0, 4), 1, "answer", "u1");
        op.apply_to(&mut doc).unwrap();
        assert_eq!(doc.text(), "let answer = 1;");
    }

    #[test]
    fn test_missing_fields_are_noops() {
        let mut doc = doc_with("abc");
        let mut op = EditOperation::insert(Position::new(0, 1), "", "u1");
        assert!(op.apply_to(&mut doc).unwrap().is_none());
        op.kind = EditKind::Delete;
        op.length = None;
        assert!(op.apply_to(&mut doc).unwrap().is_none());
        op.kind = EditKind::Replace;
        op.length = Some(1);
        assert!(op.apply_to(&mut doc).unwrap().is_none());
        assert_eq!(doc.text(), "abc");
    }

    #[test]
    fn test_delete_length_clamped() {
        let mut doc = doc_with("abc");
        EditOperation::delete(Position::new(0, 1), 50, "u1")
            .apply_to(&mut doc)
            .unwrap();
        assert_eq!(doc.text(), "a");
    }

    #[test]
    fn test_delete_never_splits_char() {
        let text = "aé";
        // 'é' occupies bytes 1..3; a one-unit delete would split it.
        assert_eq!(clamp_to_char_boundary(text, 1, 1), 0);
        assert_eq!(clamp_to_char_boundary(text, 1, 2), 2);
    }
}

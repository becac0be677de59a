//! Two-way adapter between a [`ReplicatedDocument`] and an editor model.
//!
//! Local keystrokes arrive as [`TextEdit`]s on the model's edit stream and
//! are applied to the document, one transaction each; the resulting update
//! goes to the sink. Edits are only ever taken off the stream while the
//! document lock is held, and [`EditorBinding::transact`] drains whatever
//! is pending before it changes the document. A keystroke therefore always
//! lands against the text it was typed into, even when a remote update
//! arrives before the background task wakes up.
//!
//! Remote changes are pushed into the model programmatically, which never
//! echoes back into the edit stream.
//!
//! The binding holds only a `Weak` reference to the document. Once the
//! owning session drops it the binding goes inert.

use futures_util::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::document::ReplicatedDocument;
use crate::operation::clamp_to_char_boundary;
use crate::types::CursorState;

/// One contiguous change, in UTF-8 byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub offset: u32,
    pub delete_len: u32,
    pub insert: String,
}

/// Text buffer behind an editor widget.
pub trait TextModel: Send + Sync {
    fn text(&self) -> String;

    /// Programmatic write. Must not be reported on the edit stream.
    fn replace(&self, offset: u32, delete_len: u32, insert: &str);

    /// Stream of user-originated edits. A new call replaces the previous
    /// subscriber. An edit must be on the stream before [`text`](Self::text)
    /// can observe it.
    fn local_edits(&self) -> mpsc::UnboundedReceiver<TextEdit>;
}

/// What the collaboration layer needs from an editor instance.
pub trait EditorHandle: Send + Sync {
    fn model(&self) -> Arc<dyn TextModel>;

    fn cursor(&self) -> Option<CursorState>;
}

/// Receives every encoded update produced by a local edit.
pub type UpdateSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the edit task. Lock order: document, then `edits`.
struct Shared {
    model: Arc<dyn TextModel>,
    doc: Weak<Mutex<ReplicatedDocument>>,
    edits: Mutex<mpsc::UnboundedReceiver<TextEdit>>,
    sink: UpdateSink,
    attached: AtomicBool,
}

impl Shared {
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn apply_local(&self, doc: &mut ReplicatedDocument, edit: &TextEdit) {
        match doc.transact_with(|current| clamp_edit(current, edit)) {
            Ok(Some(update)) => (self.sink)(update),
            Ok(None) => {}
            Err(e) => log::warn!("binding: local edit rejected: {e}"),
        }
    }

    /// Apply every edit already on the stream. Returns `false` once the
    /// stream is closed.
    fn drain(&self, doc: &mut ReplicatedDocument) -> bool {
        let mut edits = lock(&self.edits);
        loop {
            match edits.try_recv() {
                Ok(edit) => self.apply_local(doc, &edit),
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Wait for the next batch of local edits and apply it. `Ready(false)`
    /// ends the edit task.
    fn poll_edits(&self, cx: &mut Context<'_>) -> Poll<bool> {
        if !self.is_attached() {
            return Poll::Ready(false);
        }
        let Some(doc) = self.doc.upgrade() else {
            return Poll::Ready(false);
        };
        let mut doc = lock(&doc);
        let first = lock(&self.edits).poll_recv(cx);
        match first {
            Poll::Ready(Some(edit)) => {
                self.apply_local(&mut doc, &edit);
                Poll::Ready(self.drain(&mut doc))
            }
            Poll::Ready(None) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Drain pending local edits, run `f`, then bring the model up to date.
    fn transact<R>(&self, f: impl FnOnce(&mut ReplicatedDocument) -> R) -> Option<R> {
        if !self.is_attached() {
            return None;
        }
        let doc = self.doc.upgrade()?;
        let mut doc = lock(&doc);
        // The snapshot only counts if nothing was pending once it was taken;
        // then the document holds exactly the model's text.
        loop {
            self.drain(&mut doc);
            let before = self.model.text();
            if lock(&self.edits).is_empty() {
                let result = f(&mut *doc);
                let text = doc.text();
                if let Some(edit) = diff(&before, &text) {
                    self.model.replace(edit.offset, edit.delete_len, &edit.insert);
                }
                return Some(result);
            }
        }
    }
}

pub struct EditorBinding {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EditorBinding {
    /// Bind `editor` to `doc`. The model is immediately overwritten with
    /// the document's text.
    pub fn attach(
        doc: &Arc<Mutex<ReplicatedDocument>>,
        editor: &dyn EditorHandle,
        sink: UpdateSink,
    ) -> Self {
        let model = editor.model();
        let edits = model.local_edits();
        let shared = Arc::new(Shared {
            model: model.clone(),
            doc: Arc::downgrade(doc),
            edits: Mutex::new(edits),
            sink,
            attached: AtomicBool::new(true),
        });

        let text = lock(doc).text();
        sync_model(model.as_ref(), &text);

        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            while poll_fn(|cx| task_shared.poll_edits(cx)).await {}
            log::debug!("binding: edit stream closed");
        });
        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Run `f` against the document after every pending local edit has been
    /// applied, then push the resulting text into the model. `None` once
    /// detached or the document is gone.
    pub fn transact<R>(&self, f: impl FnOnce(&mut ReplicatedDocument) -> R) -> Option<R> {
        self.shared.transact(f)
    }

    /// Push the document's current text into the model.
    pub fn refresh(&self) {
        self.transact(|_| ());
    }

    pub fn is_attached(&self) -> bool {
        self.shared.is_attached()
    }

    /// Stop forwarding edits. Idempotent.
    pub fn detach(&self) {
        if self.shared.attached.swap(false, Ordering::AcqRel) {
            if let Some(task) = lock(&self.task).take() {
                task.abort();
            }
            log::debug!("binding: detached");
        }
    }
}

impl Drop for EditorBinding {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Fit an edit computed against the model onto the document's text.
fn clamp_edit(current: &str, edit: &TextEdit) -> Option<(u32, u32, String)> {
    if edit.delete_len == 0 && edit.insert.is_empty() {
        return None;
    }
    let mut offset = (edit.offset as usize).min(current.len());
    while !current.is_char_boundary(offset) {
        offset -= 1;
    }
    let offset = offset as u32;
    let len = edit.delete_len.min(current.len() as u32 - offset);
    let len = clamp_to_char_boundary(current, offset, len);
    Some((offset, len, edit.insert.clone()))
}

/// Apply the smallest single replacement turning `model` text into `target`.
fn sync_model(model: &dyn TextModel, target: &str) {
    let current = model.text();
    if let Some(edit) = diff(&current, target) {
        model.replace(edit.offset, edit.delete_len, &edit.insert);
    }
}

/// Common prefix/suffix diff, on character boundaries.
pub fn diff(old: &str, new: &str) -> Option<TextEdit> {
    if old == new {
        return None;
    }
    let prefix: usize = old
        .chars()
        .zip(new.chars())
        .take_while(|(a, b)| a == b)
        .map(|(c, _)| c.len_utf8())
        .sum();
    let old_rest = &old[prefix..];
    let new_rest = &new[prefix..];
    let suffix: usize = old_rest
        .chars()
        .rev()
        .zip(new_rest.chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(c, _)| c.len_utf8())
        .sum();
    Some(TextEdit {
        offset: prefix as u32,
        delete_len: (old_rest.len() - suffix) as u32,
        insert: new_rest[..new_rest.len() - suffix].to_string(),
    })
}

/// In-memory text model. `type_text`/`delete_text` simulate keystrokes;
/// [`TextModel::replace`] is the silent programmatic path.
#[derive(Default)]
pub struct BufferModel {
    text: Mutex<String>,
    edits: Mutex<Option<mpsc::UnboundedSender<TextEdit>>>,
}

impl BufferModel {
    pub fn new(initial: &str) -> Self {
        Self {
            text: Mutex::new(initial.to_string()),
            edits: Mutex::new(None),
        }
    }

    /// User types `insert` at byte `offset` (clamped to the text).
    pub fn type_text(&self, offset: u32, insert: &str) {
        self.user_edit(offset, 0, insert);
    }

    pub fn delete_text(&self, offset: u32, len: u32) {
        self.user_edit(offset, len, "");
    }

    fn user_edit(&self, offset: u32, delete_len: u32, insert: &str) {
        let mut text = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((offset, delete_len, insert)) = clamp_edit(
            &text,
            &TextEdit {
                offset,
                delete_len,
                insert: insert.to_string(),
            },
        ) else {
            return;
        };
        let start = offset as usize;
        text.replace_range(start..start + delete_len as usize, &insert);
        // Emitted under the text lock so edits are observed in model order.
        if let Some(tx) = self.edits.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = tx.send(TextEdit {
                offset,
                delete_len,
                insert,
            });
        }
    }
}

impl TextModel for BufferModel {
    fn text(&self) -> String {
        self.text.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace(&self, offset: u32, delete_len: u32, insert: &str) {
        let mut text = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        let edit = TextEdit {
            offset,
            delete_len,
            insert: insert.to_string(),
        };
        if let Some((offset, delete_len, insert)) = clamp_edit(&text, &edit) {
            let start = offset as usize;
            text.replace_range(start..start + delete_len as usize, &insert);
        }
    }

    fn local_edits(&self) -> mpsc::UnboundedReceiver<TextEdit> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.edits.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }
}

/// Headless editor over a [`BufferModel`].
pub struct BufferEditor {
    model: Arc<BufferModel>,
    cursor: Mutex<Option<CursorState>>,
}

impl BufferEditor {
    pub fn new(initial: &str) -> Self {
        Self {
            model: Arc::new(BufferModel::new(initial)),
            cursor: Mutex::new(None),
        }
    }

    pub fn buffer(&self) -> &Arc<BufferModel> {
        &self.model
    }

    pub fn text(&self) -> String {
        self.model.text()
    }

    pub fn set_cursor(&self, cursor: Option<CursorState>) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = cursor;
    }
}

impl EditorHandle for BufferEditor {
    fn model(&self) -> Arc<dyn TextModel> {
        self.model.clone()
    }

    fn cursor(&self) -> Option<CursorState> {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shared_doc(text: &str) -> Arc<Mutex<ReplicatedDocument>> {
        let mut doc = ReplicatedDocument::new("monaco");
        if !text.is_empty() {
            doc.insert(0, text).unwrap();
        }
        Arc::new(Mutex::new(doc))
    }

    fn collecting_sink() -> (UpdateSink, Arc<Mutex<Vec<Vec<u8>>>>) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let store = updates.clone();
        let sink: UpdateSink = Arc::new(move |u| store.lock().unwrap().push(u));
        (sink, updates)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[test]
    fn test_diff_prefix_suffix() {
        assert_eq!(diff("abc", "abc"), None);
        assert_eq!(
            diff("hello world", "hello brave world"),
            Some(TextEdit {
                offset: 6,
                delete_len: 0,
                insert: "brave ".into()
            })
        );
        assert_eq!(
            diff("abcdef", "abf"),
            Some(TextEdit {
                offset: 2,
                delete_len: 3,
                insert: String::new()
            })
        );
    }

    #[test]
    fn test_diff_multibyte() {
        let edit = diff("aéb", "aüb").unwrap();
        assert_eq!(edit.offset, 1);
        assert_eq!(edit.delete_len, 2);
        assert_eq!(edit.insert, "ü");
    }

    #[test]
    fn test_programmatic_replace_not_echoed() {
        let model = BufferModel::new("abc");
        let mut rx = model.local_edits();
        model.replace(0, 1, "X");
        assert_eq!(model.text(), "Xbc");
        assert!(rx.try_recv().is_err());

        model.type_text(3, "d");
        assert_eq!(
            rx.try_recv().unwrap(),
            TextEdit {
                offset: 3,
                delete_len: 0,
                insert: "d".into()
            }
        );
    }

    #[tokio::test]
    async fn test_attach_overwrites_model_with_document() {
        let doc = shared_doc("from doc");
        let editor = BufferEditor::new("stale");
        let (sink, _) = collecting_sink();
        let binding = EditorBinding::attach(&doc, &editor, sink);
        assert_eq!(editor.text(), "from doc");
        binding.detach();
    }

    #[tokio::test]
    async fn test_local_edit_reaches_document_and_sink() {
        let doc = shared_doc("");
        let editor = BufferEditor::new("");
        let (sink, updates) = collecting_sink();
        let _binding = EditorBinding::attach(&doc, &editor, sink);

        editor.buffer().type_text(0, "hi");
        editor.buffer().type_text(2, "!");
        settle().await;

        assert_eq!(doc.lock().unwrap().text(), "hi!");
        assert_eq!(updates.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_pushes_remote_text() {
        let doc = shared_doc("abc");
        let editor = BufferEditor::new("");
        let (sink, updates) = collecting_sink();
        let binding = EditorBinding::attach(&doc, &editor, sink);

        doc.lock().unwrap().insert(3, "def").unwrap();
        binding.refresh();
        settle().await;

        assert_eq!(editor.text(), "abcdef");
        assert!(updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keystroke_keeps_its_place_when_remote_update_lands_first() {
        let doc = shared_doc("abc");
        let editor = BufferEditor::new("");
        let (sink, updates) = collecting_sink();
        let binding = EditorBinding::attach(&doc, &editor, sink);

        let mut remote = ReplicatedDocument::new("monaco");
        remote.apply_update(&doc.lock().unwrap().encode_state()).unwrap();
        let remote_insert = remote.insert(0, "123").unwrap();

        // No yield between the keystroke and the remote update.
        editor.buffer().type_text(3, "X");
        binding
            .transact(|d| d.apply_update(&remote_insert))
            .unwrap()
            .unwrap();

        assert_eq!(doc.lock().unwrap().text(), "123abcX");
        assert_eq!(editor.text(), "123abcX");

        settle().await;
        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        remote.apply_update(&updates[0]).unwrap();
        assert_eq!(remote.text(), "123abcX");
    }

    #[tokio::test]
    async fn test_refresh_applies_pending_keystrokes_first() {
        let doc = shared_doc("abc");
        let editor = BufferEditor::new("");
        let (sink, updates) = collecting_sink();
        let binding = EditorBinding::attach(&doc, &editor, sink);

        editor.buffer().type_text(3, "d");
        editor.buffer().delete_text(0, 1);
        binding.refresh();

        assert_eq!(doc.lock().unwrap().text(), "bcd");
        assert_eq!(editor.text(), "bcd");
        settle().await;
        assert_eq!(updates.lock().unwrap().len(), 2);
        assert_eq!(doc.lock().unwrap().text(), "bcd");
    }

    #[tokio::test]
    async fn test_detached_binding_is_inert() {
        let doc = shared_doc("");
        let editor = BufferEditor::new("");
        let (sink, updates) = collecting_sink();
        let binding = EditorBinding::attach(&doc, &editor, sink);
        binding.detach();
        binding.detach();

        editor.buffer().type_text(0, "x");
        settle().await;
        assert!(doc.lock().unwrap().is_empty());
        assert!(updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_document_stops_binding() {
        let doc = shared_doc("");
        let editor = BufferEditor::new("");
        let (sink, updates) = collecting_sink();
        let binding = EditorBinding::attach(&doc, &editor, sink);
        drop(doc);

        editor.buffer().type_text(0, "x");
        settle().await;
        binding.refresh();
        assert!(updates.lock().unwrap().is_empty());
        assert_eq!(editor.text(), "x");
    }
}

//! CRDT-backed text container for one open file.
//!
//! Wraps a yrs `Doc` holding a single shared text. Every local mutation runs
//! in one transaction and returns the encoded update to ship to peers; remote
//! updates are merged with [`ReplicatedDocument::apply_update`]. yrs
//! guarantees that replicas which saw the same set of updates hold identical
//! text, whatever the delivery order.

use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact, Update};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("malformed update: {0}")]
    Decode(String),
    #[error("update rejected: {0}")]
    Apply(String),
    #[error("range {offset}+{len} outside document of length {doc_len}")]
    OutOfRange { offset: u32, len: u32, doc_len: u32 },
}

pub struct ReplicatedDocument {
    doc: Doc,
    text: TextRef,
}

impl ReplicatedDocument {
    /// Create an empty document whose shared text is named `text_name`.
    pub fn new(text_name: &str) -> Self {
        let doc = Doc::new();
        let text = doc.get_or_insert_text(text_name);
        Self { doc, text }
    }

    /// Current text content.
    pub fn text(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Length in index units.
    pub fn len(&self) -> u32 {
        let txn = self.doc.transact();
        self.text.len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, offset: u32, content: &str) -> Result<Vec<u8>, DocumentError> {
        self.replace(offset, 0, content)
    }

    pub fn delete(&mut self, offset: u32, len: u32) -> Result<Vec<u8>, DocumentError> {
        self.replace(offset, len, "")
    }

    /// Delete `len` units at `offset` then insert `content` there, as one
    /// transaction. Returns the v1 update produced.
    pub fn replace(&mut self, offset: u32, len: u32, content: &str) -> Result<Vec<u8>, DocumentError> {
        let mut txn = self.doc.transact_mut();
        let doc_len = self.text.len(&txn);
        if offset > doc_len || len > doc_len - offset {
            return Err(DocumentError::OutOfRange { offset, len, doc_len });
        }
        if len > 0 {
            self.text.remove_range(&mut txn, offset, len);
        }
        if !content.is_empty() {
            self.text.insert(&mut txn, offset, content);
        }
        Ok(txn.encode_update_v1())
    }

    /// Run `f` against the current text inside a single transaction.
    ///
    /// `f` returns the `(offset, delete_len, insert)` edit to perform, or
    /// `None` to leave the document untouched. Reading and writing under one
    /// transaction keeps the computed offset valid for the write.
    pub fn transact_with<F>(&mut self, f: F) -> Result<Option<Vec<u8>>, DocumentError>
    where
        F: FnOnce(&str) -> Option<(u32, u32, String)>,
    {
        let mut txn = self.doc.transact_mut();
        let current = self.text.get_string(&txn);
        let Some((offset, len, content)) = f(&current) else {
            return Ok(None);
        };
        let doc_len = self.text.len(&txn);
        if offset > doc_len || len > doc_len - offset {
            return Err(DocumentError::OutOfRange { offset, len, doc_len });
        }
        if len > 0 {
            self.text.remove_range(&mut txn, offset, len);
        }
        if !content.is_empty() {
            self.text.insert(&mut txn, offset, &content);
        }
        Ok(Some(txn.encode_update_v1()))
    }

    /// Merge a v1 update produced by another replica.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    /// Encoded state vector, sent as the first sync step.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything this replica has that the holder of `remote_sv` lacks.
    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let sv = StateVector::decode_v1(remote_sv).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    /// Full state as a single update.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> ReplicatedDocument {
        ReplicatedDocument::new("monaco")
    }

    #[test]
    fn test_insert_and_read() {
        let mut d = doc();
        assert!(d.is_empty());
        d.insert(0, "hello").unwrap();
        d.insert(5, "!").unwrap();
        assert_eq!(d.text(), "hello!");
        assert_eq!(d.len(), 6);
    }

    #[test]
    fn test_replace_is_single_update() {
        let mut a = doc();
        a.insert(0, "hello world").unwrap();
        let mut b = doc();
        b.apply_update(&a.encode_state()).unwrap();

        let update = a.replace(6, 5, "there").unwrap();
        b.apply_update(&update).unwrap();
        assert_eq!(a.text(), "hello there");
        assert_eq!(b.text(), "hello there");
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut d = doc();
        d.insert(0, "abc").unwrap();
        assert_eq!(
            d.delete(2, 5),
            Err(DocumentError::OutOfRange { offset: 2, len: 5, doc_len: 3 })
        );
        assert!(d.insert(4, "x").is_err());
        assert_eq!(d.text(), "abc");
    }

    #[test]
    fn test_convergence_any_order() {
        let mut base = doc();
        base.insert(0, "shared").unwrap();
        let seed = base.encode_state();

        let mut a = doc();
        let mut b = doc();
        a.apply_update(&seed).unwrap();
        b.apply_update(&seed).unwrap();

        let op1 = a.insert(0, "A:").unwrap();
        let op2 = b.insert(6, ":B").unwrap();

        // A sees [op1, op2], B sees [op2, op1].
        a.apply_update(&op2).unwrap();
        b.apply_update(&op1).unwrap();
        assert_eq!(a.text(), b.text());
        assert_eq!(a.text(), "A:shared:B");
    }

    #[test]
    fn test_concurrent_inserts_same_offset_converge() {
        let mut a = doc();
        let mut b = doc();
        let op_a = a.insert(0, "hello").unwrap();
        let op_b = b.insert(0, "world").unwrap();

        let mut c = doc();
        c.apply_update(&op_b).unwrap();
        c.apply_update(&op_a).unwrap();
        a.apply_update(&op_b).unwrap();
        b.apply_update(&op_a).unwrap();

        assert_eq!(a.text(), b.text());
        assert_eq!(a.text(), c.text());
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn test_duplicate_update_is_idempotent() {
        let mut a = doc();
        let mut b = doc();
        let op = a.insert(0, "once").unwrap();
        b.apply_update(&op).unwrap();
        b.apply_update(&op).unwrap();
        assert_eq!(b.text(), "once");
    }

    #[test]
    fn test_state_vector_diff_sync() {
        let mut a = doc();
        a.insert(0, "abc").unwrap();
        let mut b = doc();
        b.apply_update(&a.encode_state()).unwrap();
        a.insert(3, "def").unwrap();

        let diff = a.encode_diff(&b.state_vector()).unwrap();
        b.apply_update(&diff).unwrap();
        assert_eq!(b.text(), "abcdef");
    }

    #[test]
    fn test_transact_with_reads_current_text() {
        let mut d = doc();
        d.insert(0, "hello").unwrap();
        let update = d
            .transact_with(|text| Some((text.len() as u32, 0, "!".to_string())))
            .unwrap();
        assert!(update.is_some());
        assert_eq!(d.text(), "hello!");

        assert!(d.transact_with(|_| None).unwrap().is_none());
        assert_eq!(d.text(), "hello!");
    }

    #[test]
    fn test_garbage_update_rejected() {
        let mut d = doc();
        assert!(matches!(d.apply_update(&[0xFF, 0xFE, 0xFD]), Err(DocumentError::Decode(_)) | Err(DocumentError::Apply(_))));
        assert!(d.encode_diff(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }
}

mod memory;

pub use memory::MemoryStore;

use bson::{Bson, Document};

/// The storage collaborator: a flat map of documents keyed by canonical id,
/// with ordinal access for full scans.
///
/// `set` returns once the write is accepted; durability is the backend's
/// own contract. The in-memory backend is durable the moment `set`
/// returns — a persistent backend may acknowledge later, and the engine
/// will not wait for it. Callers must never assume ordinals are stable
/// across mutation.
pub trait Store {
    /// Full-scan access by position. Returns `None` past the end.
    fn get(&self, ordinal: usize) -> Option<&Document>;

    /// Point read by canonical id.
    fn get_by_id(&self, id: &str) -> Option<&Document>;

    /// Insert a new document or replace the one already under `id`.
    fn set(&mut self, id: &str, doc: Document);

    /// Remove and return the document under `id`, if any.
    fn remove(&mut self, id: &str) -> Option<Document>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// Snapshot of all ids in current scan order — the backing-map view.
    fn ids(&self) -> Vec<String>;
}

/// Canonical string form of a document id.
///
/// ObjectIds and plain strings deliberately share the hex key-space, so a
/// 24-hex string and the ObjectId it spells address the same document.
/// Every other scalar is type-tagged so `1` and `"1"` stay distinct
/// documents.
pub fn id_key(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::Int32(n) => format!("i:{n}"),
        Bson::Int64(n) => format!("i:{n}"),
        Bson::Double(d) => format!("f:{d}"),
        Bson::Boolean(b) => format!("b:{b}"),
        Bson::DateTime(dt) => format!("d:{}", dt.timestamp_millis()),
        other => format!("x:{other}"),
    }
}

/// Canonical id of a document, read off its `_id` field.
pub fn doc_id(doc: &Document) -> Option<String> {
    doc.get("_id").map(id_key)
}

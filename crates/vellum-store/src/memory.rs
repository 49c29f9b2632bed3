use std::collections::HashMap;

use bson::Document;

use crate::Store;

/// In-memory backing map: insertion-ordered id list plus an id-to-document
/// map. `remove` swaps the last id into the vacated slot, so ordinals are
/// not stable across deletion.
#[derive(Default)]
pub struct MemoryStore {
    order: Vec<String>,
    docs: HashMap<String, Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, ordinal: usize) -> Option<&Document> {
        self.order.get(ordinal).and_then(|id| self.docs.get(id))
    }

    fn get_by_id(&self, id: &str) -> Option<&Document> {
        self.docs.get(id)
    }

    fn set(&mut self, id: &str, doc: Document) {
        if self.docs.insert(id.to_string(), doc).is_none() {
            self.order.push(id.to_string());
        }
    }

    fn remove(&mut self, id: &str) -> Option<Document> {
        let doc = self.docs.remove(id)?;
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            self.order.swap_remove(pos);
        }
        Some(doc)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.docs.clear();
    }

    fn ids(&self) -> Vec<String> {
        self.order.clone()
    }
}

use std::collections::HashMap;

use vellum_store::{MemoryStore, Store};

use crate::collection::Collection;

/// An explicit collection registry: collections are created on first
/// access through [`Database::collection`], never by property
/// interception.
pub struct Database<S: Store = MemoryStore> {
    collections: HashMap<String, Collection<S>>,
}

impl<S: Store> Database<S> {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
        }
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_collection(&self, name: &str) -> Option<&Collection<S>> {
        self.collections.get(name)
    }

    pub fn drop_collection(&mut self, name: &str) -> bool {
        self.collections.remove(name).is_some()
    }
}

impl<S: Store + Default> Database<S> {
    /// Create-or-return the named collection.
    pub fn collection(&mut self, name: &str) -> &mut Collection<S> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(name, S::default()))
    }
}

impl<S: Store> Default for Database<S> {
    fn default() -> Self {
        Self::new()
    }
}

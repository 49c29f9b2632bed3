use std::collections::HashMap;

use bson::{Bson, Document};
use vellum_query::SortDirection;

use crate::error::DbError;
use crate::matcher;
use vellum_store::Store;

/// Separator between per-field encodings in a compound key.
const KEY_SEP: char = '\u{1f}';

/// A secondary structure mapping a canonical key encoding to the ids of
/// the documents sharing that key.
///
/// The key spec never changes once the index exists under its name.
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    key_spec: Vec<(String, SortDirection)>,
    buckets: HashMap<String, Vec<String>>,
}

impl Index {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_spec(&self) -> &[(String, SortDirection)] {
        &self.key_spec
    }

    pub fn is_single_field(&self) -> bool {
        self.key_spec.len() == 1
    }

    /// The indexed field path of a single-field index.
    pub fn field(&self) -> &str {
        &self.key_spec[0].0
    }

    /// Canonical key for a document under this index's spec, or `None`
    /// when any spec path is absent — such documents are not indexed.
    pub fn extract_key(&self, doc: &Document) -> Option<String> {
        let mut parts = Vec::with_capacity(self.key_spec.len());
        for (path, _) in &self.key_spec {
            parts.push(encode_value(matcher::get_path(doc, path)?));
        }
        Some(join_key(&parts))
    }

    /// Ids bucketed under `key`, in insertion order.
    pub fn candidates(&self, key: &str) -> Vec<String> {
        self.buckets.get(key).cloned().unwrap_or_default()
    }

    fn add(&mut self, doc: &Document, id: &str) {
        if let Some(key) = self.extract_key(doc) {
            self.buckets.entry(key).or_default().push(id.to_string());
        }
    }

    fn drop_entry(&mut self, doc: &Document, id: &str) {
        if let Some(key) = self.extract_key(doc) {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.retain(|existing| existing != id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }
}

/// The set of indexes on one collection, patched incrementally on every
/// insert and delete that flows through the collection.
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    indexes: Vec<Index>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index and backfill it with one full scan of the store.
    ///
    /// Redeclaring an existing name with the same key spec is a no-op
    /// returning the existing name; a different key spec is an error.
    pub fn create<S: Store + ?Sized>(
        &mut self,
        name: &str,
        key_spec: Vec<(String, SortDirection)>,
        store: &S,
    ) -> Result<String, DbError> {
        if let Some(existing) = self.indexes.iter().find(|i| i.name == name) {
            if existing.key_spec == key_spec {
                return Ok(name.to_string());
            }
            return Err(DbError::IndexKeySpecsConflict(format!(
                "index '{name}' already exists with a different key spec"
            )));
        }

        let mut index = Index {
            name: name.to_string(),
            key_spec,
            buckets: HashMap::new(),
        };
        for ordinal in 0..store.len() {
            if let Some(doc) = store.get(ordinal) {
                if let Some(id) = vellum_store::doc_id(doc) {
                    index.add(doc, &id);
                }
            }
        }
        self.indexes.push(index);
        Ok(name.to_string())
    }

    pub fn drop(&mut self, name: &str) -> bool {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name != name);
        self.indexes.len() != before
    }

    pub fn clear(&mut self) {
        for index in &mut self.indexes {
            index.buckets.clear();
        }
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter()
    }

    pub fn note_insert(&mut self, doc: &Document, id: &str) {
        for index in &mut self.indexes {
            index.add(doc, id);
        }
    }

    pub fn note_remove(&mut self, doc: &Document, id: &str) {
        for index in &mut self.indexes {
            index.drop_entry(doc, id);
        }
    }
}

/// Derive the MongoDB naming convention for a key spec: `field_1_other_-1`.
pub fn default_index_name(key_spec: &[(String, SortDirection)]) -> String {
    let mut name = String::new();
    for (field, direction) in key_spec {
        if !name.is_empty() {
            name.push('_');
        }
        name.push_str(field);
        name.push('_');
        name.push_str(match direction {
            SortDirection::Asc => "1",
            SortDirection::Desc => "-1",
        });
    }
    name
}

/// Canonical `(type, value)` encoding of an index key component.
///
/// The type tag keeps equal-looking values of different runtime types
/// apart — numeric `1` never collides with string `"1"`. Integral doubles
/// share the integer tag so `5` and `5.0` probe the same bucket.
pub fn encode_value(value: &Bson) -> String {
    match value {
        Bson::Null => "n:".to_string(),
        Bson::Boolean(b) => format!("b:{b}"),
        Bson::Int32(n) => format!("i:{n}"),
        Bson::Int64(n) => format!("i:{n}"),
        Bson::Double(d) if d.fract() == 0.0 && d.is_finite() => format!("i:{}", *d as i64),
        Bson::Double(d) => format!("f:{d}"),
        Bson::String(s) => format!("s:{s}"),
        Bson::ObjectId(oid) => format!("o:{}", oid.to_hex()),
        Bson::DateTime(dt) => format!("d:{}", dt.timestamp_millis()),
        Bson::Array(arr) => {
            let parts: Vec<String> = arr.iter().map(encode_value).collect();
            format!("a:{}", join_key(&parts))
        }
        Bson::Document(doc) => {
            let parts: Vec<String> = doc
                .iter()
                .map(|(k, v)| format!("{k}={}", encode_value(v)))
                .collect();
            format!("m:{}", join_key(&parts))
        }
        other => format!("x:{other}"),
    }
}

fn join_key(parts: &[String]) -> String {
    let mut out = String::new();
    for part in parts {
        if !out.is_empty() {
            out.push(KEY_SEP);
        }
        out.push_str(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use vellum_store::MemoryStore;

    fn spec(fields: &[(&str, SortDirection)]) -> Vec<(String, SortDirection)> {
        fields.iter().map(|(f, d)| (f.to_string(), *d)).collect()
    }

    #[test]
    fn type_tags_keep_types_apart() {
        assert_ne!(encode_value(&Bson::Int32(1)), encode_value(&Bson::String("1".into())));
        assert_eq!(encode_value(&Bson::Int32(5)), encode_value(&Bson::Int64(5)));
        assert_eq!(encode_value(&Bson::Int32(5)), encode_value(&Bson::Double(5.0)));
        assert_ne!(encode_value(&Bson::Boolean(true)), encode_value(&Bson::String("true".into())));
    }

    #[test]
    fn extract_key_requires_every_path() {
        let index = Index {
            name: "a_1_b_1".into(),
            key_spec: spec(&[("a", SortDirection::Asc), ("b", SortDirection::Asc)]),
            buckets: HashMap::new(),
        };
        assert!(index.extract_key(&doc! { "a": 1, "b": 2 }).is_some());
        assert!(index.extract_key(&doc! { "a": 1 }).is_none());
    }

    #[test]
    fn backfill_buckets_existing_documents() {
        let mut store = MemoryStore::new();
        store.set("1", doc! { "_id": "1", "status": "active" });
        store.set("2", doc! { "_id": "2", "status": "done" });
        store.set("3", doc! { "_id": "3", "status": "active" });
        store.set("4", doc! { "_id": "4" });

        let mut manager = IndexManager::new();
        manager
            .create("status_1", spec(&[("status", SortDirection::Asc)]), &store)
            .unwrap();

        let index = manager.get("status_1").unwrap();
        let key = encode_value(&Bson::String("active".into()));
        assert_eq!(index.candidates(&key), vec!["1".to_string(), "3".to_string()]);
    }

    #[test]
    fn incremental_maintenance_prunes_empty_buckets() {
        let store = MemoryStore::new();
        let mut manager = IndexManager::new();
        manager
            .create("status_1", spec(&[("status", SortDirection::Asc)]), &store)
            .unwrap();

        let d = doc! { "_id": "1", "status": "active" };
        manager.note_insert(&d, "1");
        let key = encode_value(&Bson::String("active".into()));
        assert_eq!(manager.get("status_1").unwrap().candidates(&key).len(), 1);

        manager.note_remove(&d, "1");
        let index = manager.get("status_1").unwrap();
        assert!(index.candidates(&key).is_empty());
        assert!(index.buckets.is_empty());
    }

    #[test]
    fn redeclare_same_spec_is_noop() {
        let store = MemoryStore::new();
        let mut manager = IndexManager::new();
        let s = spec(&[("a", SortDirection::Asc)]);
        manager.create("a_1", s.clone(), &store).unwrap();
        assert_eq!(manager.create("a_1", s, &store).unwrap(), "a_1");
        assert_eq!(manager.iter().count(), 1);
    }

    #[test]
    fn redeclare_different_spec_errors() {
        let store = MemoryStore::new();
        let mut manager = IndexManager::new();
        manager
            .create("a_1", spec(&[("a", SortDirection::Asc)]), &store)
            .unwrap();
        let err = manager
            .create("a_1", spec(&[("b", SortDirection::Asc)]), &store)
            .unwrap_err();
        assert_eq!(err.code(), 86);
    }

    #[test]
    fn default_name_follows_mongo_convention() {
        assert_eq!(
            default_index_name(&spec(&[("a", SortDirection::Asc), ("b", SortDirection::Desc)])),
            "a_1_b_-1"
        );
    }
}

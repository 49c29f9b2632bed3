use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use vellum_query::{
    FindOptions, SortDirection, UpdateDocument, UpdateOptions, parse_filter, parse_sort,
    parse_update,
};
use vellum_store::Store;

use crate::aggregate;
use crate::cursor::Cursor;
use crate::error::DbError;
use crate::index::{self, IndexManager};
use crate::matcher::{GeoPredicate, MatchContext, TextSearch};
use crate::planner;
use crate::result::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
use crate::update;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Index name; derived from the key spec when absent.
    pub name: Option<String>,
}

/// One named collection: the public query/update surface wired to the
/// storage collaborator, with index maintenance on every mutation.
///
/// Index patching is not atomic with the store write — both happen
/// inside one synchronous call, and nothing else may touch the
/// collection in between.
pub struct Collection<S: Store> {
    name: String,
    store: S,
    indexes: IndexManager,
    ctx: MatchContext,
}

impl<S: Store> Collection<S> {
    pub fn new(name: &str, store: S) -> Self {
        Self {
            name: name.to_string(),
            store,
            indexes: IndexManager::new(),
            ctx: MatchContext::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Insert operations ───────────────────────────────────────

    /// Insert a single document, assigning an ObjectId `_id` when absent.
    /// Fails with DuplicateKey if the `_id` is already present.
    pub fn insert_one(&mut self, doc: Document) -> Result<InsertOneResult, DbError> {
        let (id_value, doc) = assign_id(doc);
        let key = vellum_store::id_key(&id_value);
        if self.store.get_by_id(&key).is_some() {
            return Err(DbError::DuplicateKey(format!(
                "_id '{key}' already exists in collection '{}'",
                self.name
            )));
        }
        self.indexes.note_insert(&doc, &key);
        self.store.set(&key, doc);
        Ok(InsertOneResult { inserted_id: id_value })
    }

    pub fn insert_many(&mut self, docs: Vec<Document>) -> Result<InsertManyResult, DbError> {
        let mut inserted_ids = Vec::with_capacity(docs.len());
        for doc in docs {
            inserted_ids.push(self.insert_one(doc)?.inserted_id);
        }
        Ok(InsertManyResult { inserted_ids })
    }

    // ── Query operations ────────────────────────────────────────

    /// Plan and open a cursor over the filter. The planner may narrow the
    /// scan through a single-field index; semantics are identical either
    /// way.
    pub fn find(&self, filter: &Document) -> Result<Cursor<'_>, DbError> {
        let expr = parse_filter(filter)?;
        let candidates = planner::plan(&expr, &self.indexes).map(|plan| {
            self.indexes
                .get(&plan.index)
                .map(|i| i.candidates(&plan.key))
                .unwrap_or_default()
        });
        Ok(Cursor::new(&self.store, &self.ctx, expr, candidates))
    }

    /// `find` with projection/sort/skip/limit options, applied as:
    /// sort, then skip, then limit, with projection at yield.
    pub fn find_with(
        &self,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let mut cursor = self.find(filter)?;
        if let Some(projection) = &options.projection {
            cursor = cursor.project(projection)?;
        }
        match &options.sort {
            Some(sort) => {
                let mut sorted = cursor.sort(sort)?;
                if let Some(n) = options.skip {
                    sorted = sorted.skip(n);
                }
                if let Some(n) = options.limit {
                    sorted = sorted.limit(n);
                }
                Ok(sorted.to_vec())
            }
            None => {
                if let Some(n) = options.skip {
                    cursor = cursor.skip(n);
                }
                if let Some(n) = options.limit {
                    cursor = cursor.limit(n);
                }
                Ok(cursor.to_vec())
            }
        }
    }

    pub fn find_one(&self, filter: &Document) -> Result<Option<Document>, DbError> {
        let mut cursor = self.find(filter)?;
        Ok(cursor.next_doc())
    }

    pub fn count_documents(&self, filter: &Document) -> Result<u64, DbError> {
        Ok(self.find(filter)?.count() as u64)
    }

    /// Total document count, no filter.
    pub fn count(&self) -> u64 {
        self.store.len() as u64
    }

    /// Distinct values of a field across matching documents; array fields
    /// contribute their elements. Deduplicated by structural equality.
    pub fn distinct(
        &self,
        field: &str,
        filter: Option<&Document>,
    ) -> Result<Vec<Bson>, DbError> {
        use std::collections::HashSet;

        let empty = Document::new();
        let cursor = self.find(filter.unwrap_or(&empty))?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for doc in cursor {
            let Some(value) = crate::matcher::get_path(&doc, field) else { continue };
            let values: Vec<&Bson> = match value {
                Bson::Array(arr) => arr.iter().collect(),
                other => vec![other],
            };
            for v in values {
                if seen.insert(index::encode_value(v)) {
                    out.push(v.clone());
                }
            }
        }
        Ok(out)
    }

    // ── Update operations ───────────────────────────────────────

    /// Update the first document matching the filter.
    pub fn update_one(
        &mut self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateResult, DbError> {
        let parsed = parse_update(update)?;
        self.apply_filtered(filter, &parsed, Some(1), upsert)
    }

    /// Update every document matching the filter.
    pub fn update_many(
        &mut self,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, DbError> {
        let parsed = parse_update(update)?;
        self.apply_filtered(filter, &parsed, None, false)
    }

    /// Legacy surface: `multi` and `upsert` flags together.
    pub fn update(
        &mut self,
        filter: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult, DbError> {
        let parsed = parse_update(update)?;
        let limit = if options.multi { None } else { Some(1) };
        self.apply_filtered(filter, &parsed, limit, options.upsert)
    }

    /// Replace the first matching document wholesale. The replacement
    /// must not carry update operators; the matched `_id` is preserved.
    pub fn replace_one(
        &mut self,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> Result<UpdateResult, DbError> {
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(DbError::BadValue(
                "replacement document must not contain update operators".into(),
            ));
        }
        let parsed = UpdateDocument::Replacement(replacement.clone());
        self.apply_filtered(filter, &parsed, Some(1), upsert)
    }

    // ── find-and-modify ─────────────────────────────────────────

    /// Apply an update to the first match and return its pre-image.
    pub fn find_one_and_update(
        &mut self,
        filter: &Document,
        update: &Document,
    ) -> Result<Option<Document>, DbError> {
        let parsed = parse_update(update)?;
        let Some((key, old)) = self.first_match(filter)? else {
            return Ok(None);
        };
        self.apply_to_document(&key, &old, &parsed)?;
        Ok(Some(old))
    }

    pub fn find_one_and_replace(
        &mut self,
        filter: &Document,
        replacement: &Document,
    ) -> Result<Option<Document>, DbError> {
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(DbError::BadValue(
                "replacement document must not contain update operators".into(),
            ));
        }
        let parsed = UpdateDocument::Replacement(replacement.clone());
        let Some((key, old)) = self.first_match(filter)? else {
            return Ok(None);
        };
        self.apply_to_document(&key, &old, &parsed)?;
        Ok(Some(old))
    }

    pub fn find_one_and_delete(
        &mut self,
        filter: &Document,
    ) -> Result<Option<Document>, DbError> {
        let Some((key, old)) = self.first_match(filter)? else {
            return Ok(None);
        };
        self.indexes.note_remove(&old, &key);
        self.store.remove(&key);
        Ok(Some(old))
    }

    // ── Delete operations ───────────────────────────────────────

    pub fn delete_one(&mut self, filter: &Document) -> Result<DeleteResult, DbError> {
        self.delete_filtered(filter, Some(1))
    }

    pub fn delete_many(&mut self, filter: &Document) -> Result<DeleteResult, DbError> {
        self.delete_filtered(filter, None)
    }

    /// Legacy surface: delete all matches, or just the first.
    pub fn remove(&mut self, filter: &Document, just_one: bool) -> Result<DeleteResult, DbError> {
        self.delete_filtered(filter, if just_one { Some(1) } else { None })
    }

    // ── Index operations ────────────────────────────────────────

    /// Create an index over a `{field: ±1}` key spec, backfilling it from
    /// the current store. Returns the index name. Redeclaring an existing
    /// name with the identical spec is a no-op.
    pub fn create_index(
        &mut self,
        keys: &Document,
        options: IndexOptions,
    ) -> Result<String, DbError> {
        let key_spec: Vec<(String, SortDirection)> = parse_sort(keys)?
            .into_iter()
            .map(|s| (s.field, s.direction))
            .collect();
        if key_spec.is_empty() {
            return Err(DbError::BadValue("index key spec must not be empty".into()));
        }
        let name = options
            .name
            .unwrap_or_else(|| index::default_index_name(&key_spec));
        self.indexes.create(&name, key_spec, &self.store)
    }

    /// Index descriptors as documents: `{ name, key }`.
    pub fn get_indexes(&self) -> Vec<Document> {
        self.indexes
            .iter()
            .map(|idx| {
                let mut key = Document::new();
                for (field, direction) in idx.key_spec() {
                    let dir = match direction {
                        SortDirection::Asc => 1,
                        SortDirection::Desc => -1,
                    };
                    key.insert(field.clone(), dir);
                }
                let mut doc = Document::new();
                doc.insert("name", idx.name());
                doc.insert("key", key);
                doc
            })
            .collect()
    }

    pub fn drop_index(&mut self, name: &str) -> bool {
        self.indexes.drop(name)
    }

    // ── Aggregation ─────────────────────────────────────────────

    /// Run a pipeline over an unfiltered full scan of the collection.
    /// Eager and fully materializing, unlike `find`.
    pub fn aggregate(&self, pipeline: &[Document]) -> Result<Vec<Document>, DbError> {
        let mut docs = Vec::with_capacity(self.store.len());
        for ordinal in 0..self.store.len() {
            if let Some(doc) = self.store.get(ordinal) {
                docs.push(doc.clone());
            }
        }
        aggregate::run_pipeline(docs, pipeline, &self.ctx)
    }

    // ── Collaborator hooks ──────────────────────────────────────

    pub fn register_where<F>(&mut self, name: &str, predicate: F)
    where
        F: Fn(&Document) -> bool + 'static,
    {
        self.ctx.register_where(name, predicate);
    }

    pub fn set_text_search(&mut self, text: Box<dyn TextSearch>) {
        self.ctx.set_text_search(text);
    }

    pub fn set_geo(&mut self, geo: Box<dyn GeoPredicate>) {
        self.ctx.set_geo(geo);
    }

    // ── Unimplemented surface ───────────────────────────────────

    /// Deliberately unimplemented; raises rather than guessing at
    /// partial behaviour.
    pub fn bulk_write(&mut self, _operations: &[Document]) -> Result<(), DbError> {
        Err(DbError::NotImplemented("bulk_write".into()))
    }

    /// Deliberately unimplemented.
    pub fn explain(&self, _filter: &Document) -> Result<Document, DbError> {
        Err(DbError::NotImplemented("explain".into()))
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Drop all documents and index contents.
    pub fn drop(&mut self) {
        self.store.clear();
        self.indexes.clear();
    }

    // ── Private helpers ─────────────────────────────────────────

    /// Matching ids in cursor order — snapshotted before mutation so the
    /// scan never observes its own writes.
    fn matching_ids(
        &self,
        filter: &Document,
        limit: Option<usize>,
    ) -> Result<Vec<String>, DbError> {
        let cursor = self.find(filter)?;
        let mut ids: Vec<String> = cursor
            .map(|doc| vellum_store::doc_id(&doc))
            .into_iter()
            .flatten()
            .collect();
        if let Some(n) = limit {
            ids.truncate(n);
        }
        Ok(ids)
    }

    fn first_match(&self, filter: &Document) -> Result<Option<(String, Document)>, DbError> {
        let keys = self.matching_ids(filter, Some(1))?;
        let Some(key) = keys.into_iter().next() else {
            return Ok(None);
        };
        let Some(old) = self.store.get_by_id(&key).cloned() else {
            return Ok(None);
        };
        Ok(Some((key, old)))
    }

    fn apply_filtered(
        &mut self,
        filter: &Document,
        update: &UpdateDocument,
        limit: Option<usize>,
        upsert: bool,
    ) -> Result<UpdateResult, DbError> {
        let keys = self.matching_ids(filter, limit)?;

        let mut matched = 0u64;
        let mut modified = 0u64;
        for key in &keys {
            let Some(old) = self.store.get_by_id(key).cloned() else { continue };
            matched += 1;
            if self.apply_to_document(key, &old, update)? {
                modified += 1;
            }
        }

        if matched == 0 && upsert {
            let synthesized =
                update::doc_from_update(filter, update, Bson::ObjectId(ObjectId::new()))?;
            let inserted = self.insert_one(synthesized)?;
            return Ok(UpdateResult {
                matched_count: 0,
                modified_count: 0,
                upserted_id: Some(inserted.inserted_id),
            });
        }

        Ok(UpdateResult {
            matched_count: matched,
            modified_count: modified,
            upserted_id: None,
        })
    }

    /// Apply one parsed update to one stored document, keeping every
    /// index in step with the write.
    fn apply_to_document(
        &mut self,
        key: &str,
        old: &Document,
        update: &UpdateDocument,
    ) -> Result<bool, DbError> {
        let new_doc = match update {
            UpdateDocument::Replacement(replacement) => {
                let mut doc = Document::new();
                doc.insert("_id", old.get("_id").cloned().unwrap_or(Bson::Null));
                for (k, v) in replacement.iter() {
                    if k != "_id" {
                        doc.insert(k.clone(), v.clone());
                    }
                }
                doc
            }
            UpdateDocument::Operators(expr) => {
                let mut doc = old.clone();
                update::apply_update(expr, &mut doc, false)?;
                doc
            }
        };

        if new_doc == *old {
            return Ok(false);
        }
        self.indexes.note_remove(old, key);
        self.indexes.note_insert(&new_doc, key);
        self.store.set(key, new_doc);
        Ok(true)
    }

    fn delete_filtered(
        &mut self,
        filter: &Document,
        limit: Option<usize>,
    ) -> Result<DeleteResult, DbError> {
        let keys = self.matching_ids(filter, limit)?;
        let mut deleted = 0u64;
        for key in &keys {
            if let Some(old) = self.store.remove(key) {
                self.indexes.note_remove(&old, key);
                deleted += 1;
            }
        }
        Ok(DeleteResult { deleted_count: deleted })
    }
}

/// Ensure a document carries an `_id`, generating an ObjectId and placing
/// it first when absent.
fn assign_id(doc: Document) -> (Bson, Document) {
    if let Some(id) = doc.get("_id") {
        return (id.clone(), doc);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut out = Document::new();
    out.insert("_id", id.clone());
    for (key, value) in doc.iter() {
        out.insert(key.clone(), value.clone());
    }
    (id, out)
}

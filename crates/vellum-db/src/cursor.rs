use std::cmp::Ordering;
use std::collections::HashSet;

use bson::{Bson, Document};
use vellum_query::{Expression, Projection, SortSpec, SortDirection, parse_sort};
use vellum_store::Store;

use crate::error::DbError;
use crate::matcher::{self, MatchContext};

/// One-slot look-ahead: the next unconsumed matching document, or a
/// marker that it has not been computed yet / the cursor is exhausted.
enum Lookahead {
    NotComputed,
    Ready(Document),
    Done,
}

/// A lazy, pull-based stream of matching documents.
///
/// When the planner produced an index plan, its candidate ids are tested
/// first — against the full predicate, because a single-field index only
/// narrows scope. The cursor then falls through to a sequential full
/// scan, skipping ids it already yielded, so a document is never
/// returned twice no matter which path found it.
///
/// `limit` is deliberately two-faced: on the index path it caps matches
/// yielded, on the fall-through scan it caps scan positions advanced.
/// Collapsing the two would silently change result counts for some
/// queries. Projection is applied only at yield time, never during
/// matching.
pub struct Cursor<'a> {
    store: &'a dyn Store,
    ctx: &'a MatchContext,
    expr: Expression,
    candidates: Option<Vec<String>>,
    cand_pos: usize,
    scan_pos: usize,
    seen: HashSet<String>,
    projection: Option<Projection>,
    limit: Option<usize>,
    yielded: usize,
    lookahead: Lookahead,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(
        store: &'a dyn Store,
        ctx: &'a MatchContext,
        expr: Expression,
        candidates: Option<Vec<String>>,
    ) -> Self {
        Self {
            store,
            ctx,
            expr,
            candidates,
            cand_pos: 0,
            scan_pos: 0,
            seen: HashSet::new(),
            projection: None,
            limit: None,
            yielded: 0,
            lookahead: Lookahead::NotComputed,
        }
    }

    // ── Builders ────────────────────────────────────────────────

    pub fn project(mut self, projection: &Document) -> Result<Self, DbError> {
        self.projection = Some(Projection::parse(projection)?);
        Ok(self)
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Discard the first `n` matches by pulling them.
    pub fn skip(mut self, n: usize) -> Self {
        for _ in 0..n {
            if self.pull().is_none() {
                break;
            }
        }
        self
    }

    /// Drain the cursor and produce an eagerly sorted view of it.
    pub fn sort(mut self, spec: &Document) -> Result<SortedCursor, DbError> {
        let specs = parse_sort(spec)?;
        let mut docs = Vec::new();
        while let Some(doc) = self.pull() {
            docs.push(doc);
        }
        sort_documents(&mut docs, &specs);
        Ok(SortedCursor {
            docs,
            pos: 0,
            projection: self.projection,
        })
    }

    // ── Iteration ───────────────────────────────────────────────

    pub fn has_next(&mut self) -> bool {
        if matches!(self.lookahead, Lookahead::NotComputed) {
            self.lookahead = match self.advance() {
                Some(doc) => Lookahead::Ready(doc),
                None => Lookahead::Done,
            };
        }
        matches!(self.lookahead, Lookahead::Ready(_))
    }

    /// The next matching document, projected.
    pub fn next_doc(&mut self) -> Option<Document> {
        let doc = self.pull()?;
        Some(match &self.projection {
            Some(projection) => projection.apply(&doc),
            None => doc,
        })
    }

    /// Count matches without disturbing this cursor: reconstruct a fresh,
    /// unprojected, unlimited cursor over the same plan inputs and drain
    /// it.
    pub fn count(&self) -> usize {
        let mut fresh = Cursor::new(
            self.store,
            self.ctx,
            self.expr.clone(),
            self.candidates.clone(),
        );
        let mut n = 0;
        while fresh.pull().is_some() {
            n += 1;
        }
        n
    }

    pub fn to_vec(mut self) -> Vec<Document> {
        let mut out = Vec::new();
        while let Some(doc) = self.next_doc() {
            out.push(doc);
        }
        out
    }

    pub fn for_each<F: FnMut(&Document)>(mut self, mut f: F) {
        while let Some(doc) = self.next_doc() {
            f(&doc);
        }
    }

    pub fn map<T, F: FnMut(Document) -> T>(mut self, mut f: F) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(doc) = self.next_doc() {
            out.push(f(doc));
        }
        out
    }

    // ── Internals ───────────────────────────────────────────────

    /// Next unprojected match, consuming the look-ahead slot first.
    fn pull(&mut self) -> Option<Document> {
        match std::mem::replace(&mut self.lookahead, Lookahead::NotComputed) {
            Lookahead::Ready(doc) => Some(doc),
            Lookahead::Done => {
                self.lookahead = Lookahead::Done;
                None
            }
            Lookahead::NotComputed => self.advance(),
        }
    }

    fn advance(&mut self) -> Option<Document> {
        let store = self.store;

        if let Some(n) = self.limit {
            if self.yielded >= n {
                return None;
            }
        }

        // Index-derived candidates narrow scope, nothing more; the full
        // predicate is always re-evaluated.
        if let Some(candidates) = &self.candidates {
            while self.cand_pos < candidates.len() {
                let id = candidates[self.cand_pos].clone();
                self.cand_pos += 1;
                if self.seen.contains(&id) {
                    continue;
                }
                if let Some(doc) = store.get_by_id(&id) {
                    if matcher::matches(doc, &self.expr, self.ctx) {
                        self.seen.insert(id);
                        self.yielded += 1;
                        return Some(doc.clone());
                    }
                }
            }
        }

        // Fall through to the sequential scan. Here `limit` caps positions
        // advanced, not matches found.
        loop {
            if let Some(n) = self.limit {
                if self.scan_pos >= n {
                    return None;
                }
            }
            let doc = store.get(self.scan_pos)?;
            self.scan_pos += 1;

            let id = vellum_store::doc_id(doc);
            if let Some(id) = &id {
                if self.seen.contains(id) {
                    continue;
                }
            }
            if matcher::matches(doc, &self.expr, self.ctx) {
                if let Some(id) = id {
                    self.seen.insert(id);
                }
                self.yielded += 1;
                return Some(doc.clone());
            }
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.next_doc()
    }
}

/// The materialized result of `Cursor::sort`.
pub struct SortedCursor {
    docs: Vec<Document>,
    pos: usize,
    projection: Option<Projection>,
}

impl SortedCursor {
    /// Truncate the materialized array to the next `n` documents.
    pub fn limit(mut self, n: usize) -> Self {
        self.docs.truncate(self.pos.saturating_add(n).min(self.docs.len()));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.pos = (self.pos + n).min(self.docs.len());
        self
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.docs.len()
    }

    pub fn next_doc(&mut self) -> Option<Document> {
        let doc = self.docs.get(self.pos)?;
        self.pos += 1;
        Some(match &self.projection {
            Some(projection) => projection.apply(doc),
            None => doc.clone(),
        })
    }

    pub fn count(&self) -> usize {
        self.docs.len() - self.pos
    }

    pub fn to_vec(mut self) -> Vec<Document> {
        let mut out = Vec::new();
        while let Some(doc) = self.next_doc() {
            out.push(doc);
        }
        out
    }
}

impl Iterator for SortedCursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.next_doc()
    }
}

// ── Sorting ─────────────────────────────────────────────────────

/// Multi-key stable sort. For each key a document missing the field sorts
/// before one that has it in ascending order, after it in descending;
/// ties fall through to the next key.
pub(crate) fn sort_documents(docs: &mut [Document], specs: &[SortSpec]) {
    docs.sort_by(|a, b| {
        for spec in specs {
            let av = matcher::get_path(a, &spec.field);
            let bv = matcher::get_path(b, &spec.field);
            let ord = compare_sort_values(av, bv);
            let ord = match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Missing sorts low; `null` counts as missing for ordering purposes.
fn compare_sort_values(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(Bson::Null), None) | (None, Some(Bson::Null)) => Ordering::Equal,
        (Some(Bson::Null), Some(Bson::Null)) => Ordering::Equal,
        (None, Some(_)) | (Some(Bson::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Bson::Null)) => Ordering::Greater,
        (Some(a), Some(b)) => matcher::compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

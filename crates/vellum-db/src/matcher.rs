use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use bson::{Bson, Document};
use vellum_query::{ElemMatch, Expression, FieldCond, FieldOp};

use crate::error::DbError;

// ── Collaborators ───────────────────────────────────────────────

/// Free-text search collaborator consulted by `$text`.
/// Returns the ids of documents whose indexed text matches the query.
pub trait TextSearch {
    fn search(&self, query: &str) -> Result<Vec<String>, DbError>;
}

/// Geometry collaborator consulted by `$geoWithin`.
pub trait GeoPredicate {
    fn within(&self, value: &Bson, shape: &Document) -> Result<bool, DbError>;
}

type WhereFn = Box<dyn Fn(&Document) -> bool>;

/// Evaluation context: the `$where` predicate registry and the optional
/// search/geometry collaborators. An empty context simply makes those
/// three operators match nothing.
#[derive(Default)]
pub struct MatchContext {
    wheres: HashMap<String, WhereFn>,
    text: Option<Box<dyn TextSearch>>,
    geo: Option<Box<dyn GeoPredicate>>,
}

impl MatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_where<F>(&mut self, name: &str, predicate: F)
    where
        F: Fn(&Document) -> bool + 'static,
    {
        self.wheres.insert(name.to_string(), Box::new(predicate));
    }

    pub fn set_text_search(&mut self, text: Box<dyn TextSearch>) {
        self.text = Some(text);
    }

    pub fn set_geo(&mut self, geo: Box<dyn GeoPredicate>) {
        self.geo = Some(geo);
    }

    /// Run a registered `$where` predicate. Unknown names and panicking
    /// predicates count as "no match"; a predicate failure never aborts
    /// the scan.
    fn eval_where(&self, name: &str, doc: &Document) -> bool {
        match self.wheres.get(name) {
            Some(f) => panic::catch_unwind(AssertUnwindSafe(|| f(doc))).unwrap_or(false),
            None => false,
        }
    }
}

// ── Evaluation ──────────────────────────────────────────────────

/// Evaluate a parsed filter expression against one document.
///
/// All operand-shape validation happened at parse time, so evaluation is
/// infallible; the only failure modes left (`$where`, `$text`,
/// `$geoWithin`) fail closed.
pub fn matches(doc: &Document, expr: &Expression, ctx: &MatchContext) -> bool {
    match expr {
        Expression::And(children) => children.iter().all(|c| matches(doc, c, ctx)),
        Expression::Or(children) => children.iter().any(|c| matches(doc, c, ctx)),
        Expression::Nor(children) => children.iter().any(|c| !matches(doc, c, ctx)),
        Expression::Not(inner) => !matches(doc, inner, ctx),
        Expression::Where(name) => ctx.eval_where(name, doc),
        Expression::Field { path, cond } => {
            let value = get_path(doc, path);
            match cond {
                FieldCond::Literal(lit) => literal_matches(value, lit),
                FieldCond::Ops(ops) => ops.iter().all(|op| eval_op(doc, value, op, ctx)),
            }
        }
    }
}

/// Walk a dot-separated path through nested documents.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        match value {
            Bson::Document(sub) => current = sub,
            _ => return None,
        }
    }
    None
}

fn eval_op(doc: &Document, value: Option<&Bson>, op: &FieldOp, ctx: &MatchContext) -> bool {
    match op {
        FieldOp::Eq(operand) => literal_matches(value, operand),
        FieldOp::Ne(operand) => !literal_matches(value, operand),
        FieldOp::Gt(operand) => compare_matches(value, operand, |o| o == Ordering::Greater),
        FieldOp::Gte(operand) => compare_matches(value, operand, |o| o != Ordering::Less),
        FieldOp::Lt(operand) => compare_matches(value, operand, |o| o == Ordering::Less),
        FieldOp::Lte(operand) => compare_matches(value, operand, |o| o != Ordering::Greater),
        FieldOp::In(operands) => operands.iter().any(|v| literal_matches(value, v)),
        FieldOp::Nin(operands) => !operands.iter().any(|v| literal_matches(value, v)),
        FieldOp::Exists(wanted) => value.is_some() == *wanted,
        FieldOp::Type(name) => value.is_some_and(|v| type_matches(v, name)),
        FieldOp::Mod { divisor, remainder } => mod_matches(value, *divisor, *remainder),
        FieldOp::Regex(re) => match value {
            Some(Bson::String(s)) => re.is_match(s),
            Some(Bson::Array(arr)) => arr
                .iter()
                .any(|e| matches!(e, Bson::String(s) if re.is_match(s))),
            _ => false,
        },
        FieldOp::Text(query) => text_matches(doc, query, ctx),
        FieldOp::GeoWithin(shape) => match (&ctx.geo, value) {
            (Some(geo), Some(v)) => geo.within(v, shape).unwrap_or(false),
            _ => false,
        },
        FieldOp::Not(ops) => !ops.iter().all(|op| eval_op(doc, value, op, ctx)),
        FieldOp::All(operands) => match value {
            Some(Bson::Array(arr)) => operands
                .iter()
                .all(|v| arr.iter().any(|e| values_eq(e, v))),
            _ => false,
        },
        FieldOp::Size(n) => {
            matches!(value, Some(Bson::Array(arr)) if arr.len() as i64 == *n)
        }
        FieldOp::ElemMatch(em) => match value {
            Some(Bson::Array(arr)) => arr.iter().any(|elem| match em {
                ElemMatch::Query(expr) => match elem {
                    Bson::Document(d) => matches(d, expr, ctx),
                    _ => false,
                },
                ElemMatch::Ops(ops) => ops.iter().all(|op| eval_op(doc, Some(elem), op, ctx)),
            }),
            _ => false,
        },
    }
}

/// `$text` delegates to the search collaborator: the predicate holds iff
/// exactly one indexed id matched the query string and it is this
/// document's id. Collaborator errors fail closed.
fn text_matches(doc: &Document, query: &str, ctx: &MatchContext) -> bool {
    let Some(text) = &ctx.text else { return false };
    match text.search(query) {
        Ok(ids) => {
            ids.len() == 1 && vellum_store::doc_id(doc).as_deref() == Some(ids[0].as_str())
        }
        Err(_) => false,
    }
}

fn mod_matches(value: Option<&Bson>, divisor: i64, remainder: i64) -> bool {
    let check = |v: &Bson| match v {
        Bson::Int32(n) => (*n as i64) % divisor == remainder,
        Bson::Int64(n) => *n % divisor == remainder,
        Bson::Double(d) => (*d as i64) % divisor == remainder,
        _ => false,
    };
    match value {
        Some(Bson::Array(arr)) => arr.iter().any(check),
        Some(v) => check(v),
        None => false,
    }
}

/// Implicit-equality rule: deep value equality, a `null` literal also
/// matching a missing field, and a non-array literal matching any element
/// of an array field.
fn literal_matches(value: Option<&Bson>, lit: &Bson) -> bool {
    match value {
        None => matches!(lit, Bson::Null),
        Some(v) => {
            if values_eq(v, lit) {
                return true;
            }
            match (v, lit) {
                (Bson::Array(arr), Bson::Array(_)) => {
                    // element-wise equality already failed above
                    arr.iter().any(|e| values_eq(e, lit))
                }
                (Bson::Array(arr), _) => arr.iter().any(|e| values_eq(e, lit)),
                _ => false,
            }
        }
    }
}

fn compare_matches(value: Option<&Bson>, operand: &Bson, pred: fn(Ordering) -> bool) -> bool {
    match value {
        Some(Bson::Array(arr)) if !matches!(operand, Bson::Array(_)) => arr
            .iter()
            .any(|e| compare_values(e, operand).is_some_and(pred)),
        Some(v) => compare_values(v, operand).is_some_and(pred),
        None => false,
    }
}

// ── Value equality & ordering ───────────────────────────────────

/// Deep value equality with identifier awareness: an ObjectId equals the
/// 24-hex string spelling it, in either direction; numeric widths are
/// unified; embedded documents need the exact key set on both sides.
pub fn values_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x == y,
        (Bson::ObjectId(oid), Bson::String(s)) | (Bson::String(s), Bson::ObjectId(oid)) => {
            oid.to_hex() == *s
        }
        (Bson::String(x), Bson::String(y)) => x == y,
        (Bson::Boolean(x), Bson::Boolean(y)) => x == y,
        (Bson::Null, Bson::Null) => true,
        (Bson::Int32(x), Bson::Int32(y)) => x == y,
        (Bson::Int64(x), Bson::Int64(y)) => x == y,
        (Bson::Int32(x), Bson::Int64(y)) | (Bson::Int64(y), Bson::Int32(x)) => {
            (*x as i64) == *y
        }
        (Bson::Double(x), Bson::Double(y)) => x == y,
        (Bson::Double(x), Bson::Int32(y)) | (Bson::Int32(y), Bson::Double(x)) => {
            *x == (*y as f64)
        }
        (Bson::Double(x), Bson::Int64(y)) | (Bson::Int64(y), Bson::Double(x)) => {
            *x == (*y as f64)
        }
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis() == y.timestamp_millis()
        }
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_eq(a, b))
        }
        (Bson::Document(x), Bson::Document(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_eq(v, w)))
        }
        _ => false,
    }
}

/// Ordering for range operators and sorting. Identifiers are coerced to
/// their string form before comparison; incompatible types do not order.
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.to_hex().cmp(&y.to_hex())),
        (Bson::ObjectId(x), Bson::String(y)) => Some(x.to_hex().as_str().cmp(y)),
        (Bson::String(x), Bson::ObjectId(y)) => Some(x.as_str().cmp(y.to_hex().as_str())),
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Int32(x), Bson::Int32(y)) => Some(x.cmp(y)),
        (Bson::Int64(x), Bson::Int64(y)) => Some(x.cmp(y)),
        (Bson::Int32(x), Bson::Int64(y)) => Some((*x as i64).cmp(y)),
        (Bson::Int64(x), Bson::Int32(y)) => Some(x.cmp(&(*y as i64))),
        (Bson::Double(x), Bson::Double(y)) => x.partial_cmp(y),
        (Bson::Double(x), Bson::Int32(y)) => x.partial_cmp(&(*y as f64)),
        (Bson::Double(x), Bson::Int64(y)) => x.partial_cmp(&(*y as f64)),
        (Bson::Int32(x), Bson::Double(y)) => (*x as f64).partial_cmp(y),
        (Bson::Int64(x), Bson::Double(y)) => (*x as f64).partial_cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        _ => None,
    }
}

fn type_matches(value: &Bson, name: &str) -> bool {
    match name {
        "double" => matches!(value, Bson::Double(_)),
        "string" => matches!(value, Bson::String(_)),
        "object" => matches!(value, Bson::Document(_)),
        "array" => matches!(value, Bson::Array(_)),
        "binData" => matches!(value, Bson::Binary(_)),
        "objectId" => matches!(value, Bson::ObjectId(_)),
        "bool" => matches!(value, Bson::Boolean(_)),
        "date" => matches!(value, Bson::DateTime(_)),
        "null" => matches!(value, Bson::Null),
        "regex" => matches!(value, Bson::RegularExpression(_)),
        "int" => matches!(value, Bson::Int32(_)),
        "long" => matches!(value, Bson::Int64(_)),
        "number" => matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)),
        _ => false,
    }
}

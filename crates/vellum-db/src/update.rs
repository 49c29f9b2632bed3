use bson::{Bson, Document};
use vellum_query::{BitOp, UpdateDocument, UpdateExpr, UpdateOp};

use crate::error::DbError;
use crate::matcher;

/// Apply a parsed update expression to a document in place.
///
/// `on_insert` is true only while synthesizing an upsert document; it
/// gates `$setOnInsert`. Returns whether anything changed.
pub fn apply_update(
    expr: &UpdateExpr,
    doc: &mut Document,
    on_insert: bool,
) -> Result<bool, DbError> {
    let mut changed = false;

    for fu in &expr.ops {
        // Operators that materialize their target create missing
        // intermediate sub-documents on the way down.
        let creates = matches!(
            fu.op,
            UpdateOp::Set(_)
                | UpdateOp::SetOnInsert(_)
                | UpdateOp::Inc(_)
                | UpdateOp::Mul(_)
                | UpdateOp::Min(_)
                | UpdateOp::Max(_)
                | UpdateOp::CurrentDate
                | UpdateOp::Push(_)
                | UpdateOp::PushAll(_)
                | UpdateOp::AddToSet(_)
                | UpdateOp::Bit { .. }
        );

        if let UpdateOp::SetOnInsert(_) = &fu.op {
            if !on_insert {
                continue;
            }
        }

        // $rename moves a value between two paths; handle it whole.
        if let UpdateOp::Rename(new_path) = &fu.op {
            changed |= op_rename(doc, &fu.field, new_path)?;
            continue;
        }

        let Some((parent, leaf)) = resolve_parent_mut(doc, &fu.field, creates)? else {
            continue;
        };

        changed |= match &fu.op {
            UpdateOp::Set(value) | UpdateOp::SetOnInsert(value) => op_set(parent, leaf, value)?,
            UpdateOp::Unset => op_unset(parent, leaf)?,
            UpdateOp::Inc(amount) => op_inc(parent, leaf, amount)?,
            UpdateOp::Mul(factor) => op_mul(parent, leaf, factor)?,
            UpdateOp::Min(value) => op_min_max(parent, leaf, value, std::cmp::Ordering::Less)?,
            UpdateOp::Max(value) => op_min_max(parent, leaf, value, std::cmp::Ordering::Greater)?,
            UpdateOp::CurrentDate => {
                parent.insert(leaf.to_string(), Bson::DateTime(bson::DateTime::now()));
                true
            }
            UpdateOp::Push(value) => op_push(parent, leaf, std::slice::from_ref(value))?,
            UpdateOp::PushAll(values) => op_push(parent, leaf, values)?,
            UpdateOp::Pull(value) => op_pull(parent, leaf, std::slice::from_ref(value))?,
            UpdateOp::PullAll(values) => op_pull(parent, leaf, values)?,
            UpdateOp::Pop(sign) => op_pop(parent, leaf, *sign)?,
            UpdateOp::AddToSet(value) => op_add_to_set(parent, leaf, value)?,
            UpdateOp::Bit { op, operand } => op_bit(parent, leaf, *op, *operand)?,
            UpdateOp::Rename(_) => unreachable!("handled above"),
        };
    }

    Ok(changed)
}

/// Synthesize the document an upsert inserts when nothing matched.
///
/// A replacement update becomes the new document (keeping its own `_id`
/// if it carries one). An operator update seeds the document from the
/// query's literal field/value pairs — equality clauses become initial
/// field values — then applies the operators with the insert path on.
pub fn doc_from_update(
    query: &Document,
    update: &UpdateDocument,
    id: Bson,
) -> Result<Document, DbError> {
    match update {
        UpdateDocument::Replacement(replacement) => {
            let mut doc = Document::new();
            match replacement.get("_id") {
                Some(existing) => doc.insert("_id", existing.clone()),
                None => doc.insert("_id", id),
            };
            for (key, value) in replacement.iter() {
                if key != "_id" {
                    doc.insert(key.clone(), value.clone());
                }
            }
            Ok(doc)
        }
        UpdateDocument::Operators(expr) => {
            let mut doc = Document::new();
            doc.insert("_id", id);
            for (key, value) in query.iter() {
                if key.starts_with('$') {
                    continue;
                }
                // Operator sub-documents are predicates, not values.
                if let Bson::Document(sub) = value {
                    if sub.keys().any(|k| k.starts_with('$')) {
                        continue;
                    }
                }
                if let Some((parent, leaf)) = resolve_parent_mut(&mut doc, key, true)? {
                    parent.insert(leaf.to_string(), value.clone());
                }
            }
            apply_update(expr, &mut doc, true)?;
            // A $set on _id would have clobbered the generated id; keep
            // whatever ended up there, but never drop the field.
            if !doc.contains_key("_id") {
                return Err(DbError::BadValue("upsert document lost its _id".into()));
            }
            Ok(doc)
        }
    }
}

/// Resolve a dot-path to its parent document and leaf field name.
///
/// For `"address.city"`, walks into `doc["address"]` and returns the
/// sub-document plus `"city"`. With `create`, missing intermediates are
/// created; otherwise the walk stops and the operation is a no-op.
fn resolve_parent_mut<'d, 'p>(
    doc: &'d mut Document,
    path: &'p str,
    create: bool,
) -> Result<Option<(&'d mut Document, &'p str)>, DbError> {
    let (intermediates, leaf) = match path.rsplit_once('.') {
        Some((head, leaf)) => (head, leaf),
        None => return Ok(Some((doc, path))),
    };

    let mut current = doc;
    for segment in intermediates.split('.') {
        if !current.contains_key(segment) {
            if create {
                current.insert(segment.to_string(), Bson::Document(Document::new()));
            } else {
                return Ok(None);
            }
        }
        current = match current.get_mut(segment) {
            Some(Bson::Document(sub)) => sub,
            _ => {
                return Err(DbError::TypeMismatch(format!(
                    "field path '{path}': intermediate '{segment}' is not a document"
                )));
            }
        };
    }
    Ok(Some((current, leaf)))
}

/// `$set` — no-op when the value is already equal.
fn op_set(doc: &mut Document, field: &str, value: &Bson) -> Result<bool, DbError> {
    if doc.get(field) == Some(value) {
        return Ok(false);
    }
    doc.insert(field.to_string(), value.clone());
    Ok(true)
}

fn op_unset(doc: &mut Document, field: &str) -> Result<bool, DbError> {
    Ok(doc.remove(field).is_some())
}

/// `$inc` — increment a numeric field.
///
/// Type promotion: i32 + i32 stays i32 unless it overflows (then i64);
/// any double operand makes the result a double; a missing field starts
/// from zero of the increment's type.
fn op_inc(doc: &mut Document, field: &str, amount: &Bson) -> Result<bool, DbError> {
    let current = doc.get(field).cloned().unwrap_or_else(|| zero_like(amount));
    let sum = numeric_combine(
        &current,
        amount,
        field,
        "$inc",
        |a, b| a.checked_add(b),
        |a, b| a + b,
        |a, b| a + b,
    )?;
    doc.insert(field.to_string(), sum);
    Ok(true)
}

/// `$mul` — multiply a numeric field; a missing field becomes zero of
/// the operand's type.
fn op_mul(doc: &mut Document, field: &str, factor: &Bson) -> Result<bool, DbError> {
    let current = doc.get(field).cloned().unwrap_or_else(|| zero_like(factor));
    let product = numeric_combine(
        &current,
        factor,
        field,
        "$mul",
        |a, b| a.checked_mul(b),
        |a, b| a * b,
        |a, b| a * b,
    )?;
    doc.insert(field.to_string(), product);
    Ok(true)
}

fn zero_like(operand: &Bson) -> Bson {
    match operand {
        Bson::Double(_) => Bson::Double(0.0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Int32(0),
    }
}

fn numeric_combine(
    current: &Bson,
    operand: &Bson,
    field: &str,
    op_name: &str,
    int_op: fn(i32, i32) -> Option<i32>,
    wide: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Bson, DbError> {
    let result = match (current, operand) {
        (Bson::Int32(a), Bson::Int32(b)) => match int_op(*a, *b) {
            Some(n) => Bson::Int32(n),
            None => Bson::Int64(wide(*a as i64, *b as i64)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(wide(*a as i64, *b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(wide(*a, *b as i64)),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(wide(*a, *b)),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(float_op(*a, *b)),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(float_op(*a as f64, *b)),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(float_op(*a as f64, *b)),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(float_op(*a, *b as f64)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(float_op(*a, *b as f64)),
        _ => {
            return Err(DbError::TypeMismatch(format!(
                "{op_name}: field '{field}' is not numeric"
            )));
        }
    };
    Ok(result)
}

/// `$min`/`$max` — replace only when the operand orders on the wanted
/// side of the current value; a missing field is always set.
fn op_min_max(
    doc: &mut Document,
    field: &str,
    value: &Bson,
    wanted: std::cmp::Ordering,
) -> Result<bool, DbError> {
    match doc.get(field) {
        None => {
            doc.insert(field.to_string(), value.clone());
            Ok(true)
        }
        Some(current) => match matcher::compare_values(value, current) {
            Some(ord) if ord == wanted => {
                doc.insert(field.to_string(), value.clone());
                Ok(true)
            }
            _ => Ok(false),
        },
    }
}

fn op_rename(doc: &mut Document, field: &str, new_path: &str) -> Result<bool, DbError> {
    let value = match resolve_parent_mut(doc, field, false)? {
        Some((parent, leaf)) => match parent.remove(leaf) {
            Some(v) => v,
            None => return Ok(false),
        },
        None => return Ok(false),
    };
    if let Some((parent, leaf)) = resolve_parent_mut(doc, new_path, true)? {
        parent.insert(leaf.to_string(), value);
    }
    Ok(true)
}

/// `$push`/`$pushAll` — append to an array field, creating it if absent.
fn op_push(doc: &mut Document, field: &str, values: &[Bson]) -> Result<bool, DbError> {
    if values.is_empty() {
        return Ok(false);
    }
    match doc.get_mut(field) {
        Some(Bson::Array(arr)) => {
            arr.extend(values.iter().cloned());
            Ok(true)
        }
        Some(_) => Err(DbError::TypeMismatch(format!(
            "$push: field '{field}' is not an array"
        ))),
        None => {
            doc.insert(field.to_string(), Bson::Array(values.to_vec()));
            Ok(true)
        }
    }
}

/// `$pull`/`$pullAll` — remove every element equal to one of the listed
/// values. Value-based, not predicate-based.
fn op_pull(doc: &mut Document, field: &str, values: &[Bson]) -> Result<bool, DbError> {
    match doc.get_mut(field) {
        Some(Bson::Array(arr)) => {
            let before = arr.len();
            arr.retain(|e| !values.iter().any(|v| matcher::values_eq(e, v)));
            Ok(arr.len() != before)
        }
        Some(_) => Err(DbError::TypeMismatch(format!(
            "$pull: field '{field}' is not an array"
        ))),
        None => Ok(false),
    }
}

/// `$pop` — remove the last (1) or first (-1) array element.
fn op_pop(doc: &mut Document, field: &str, sign: i32) -> Result<bool, DbError> {
    match doc.get_mut(field) {
        Some(Bson::Array(arr)) => {
            if arr.is_empty() {
                return Ok(false);
            }
            if sign >= 0 {
                arr.pop();
            } else {
                arr.remove(0);
            }
            Ok(true)
        }
        Some(_) => Err(DbError::TypeMismatch(format!(
            "$pop: field '{field}' is not an array"
        ))),
        None => Ok(false),
    }
}

/// `$addToSet` — append unless an equal element already exists.
fn op_add_to_set(doc: &mut Document, field: &str, value: &Bson) -> Result<bool, DbError> {
    match doc.get_mut(field) {
        Some(Bson::Array(arr)) => {
            if arr.iter().any(|e| matcher::values_eq(e, value)) {
                Ok(false)
            } else {
                arr.push(value.clone());
                Ok(true)
            }
        }
        Some(_) => Err(DbError::TypeMismatch(format!(
            "$addToSet: field '{field}' is not an array"
        ))),
        None => {
            doc.insert(field.to_string(), Bson::Array(vec![value.clone()]));
            Ok(true)
        }
    }
}

/// `$bit` — and/or/xor on an integer field; a missing field starts at 0.
fn op_bit(doc: &mut Document, field: &str, op: BitOp, operand: i64) -> Result<bool, DbError> {
    let current = match doc.get(field) {
        Some(Bson::Int32(n)) => *n as i64,
        Some(Bson::Int64(n)) => *n,
        None => 0,
        Some(_) => {
            return Err(DbError::TypeMismatch(format!(
                "$bit: field '{field}' is not an integer"
            )));
        }
    };
    let result = match op {
        BitOp::And => current & operand,
        BitOp::Or => current | operand,
        BitOp::Xor => current ^ operand,
    };
    let changed = result != current || !doc.contains_key(field);
    doc.insert(field.to_string(), Bson::Int64(result));
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use vellum_query::parse_update;

    fn ops(update: Document) -> UpdateExpr {
        match parse_update(&update).unwrap() {
            UpdateDocument::Operators(expr) => expr,
            _ => panic!("expected operator update"),
        }
    }

    fn apply(doc: &mut Document, update: Document) -> bool {
        apply_update(&ops(update), doc, false).unwrap()
    }

    // ── $set / $unset ───────────────────────────────────────────

    #[test]
    fn set_new_and_existing() {
        let mut d = doc! { "a": 1 };
        assert!(apply(&mut d, doc! { "$set": { "b": 2 } }));
        assert_eq!(d.get_i32("b").unwrap(), 2);
        assert!(apply(&mut d, doc! { "$set": { "a": 9 } }));
        assert!(!apply(&mut d, doc! { "$set": { "a": 9 } }));
    }

    #[test]
    fn set_dotted_creates_intermediates() {
        let mut d = doc! {};
        assert!(apply(&mut d, doc! { "$set": { "a.b.c": 1 } }));
        assert_eq!(d, doc! { "a": { "b": { "c": 1 } } });
    }

    #[test]
    fn set_through_scalar_intermediate_errors() {
        let mut d = doc! { "a": 42 };
        let expr = ops(doc! { "$set": { "a.b": 1 } });
        let err = apply_update(&expr, &mut d, false).unwrap_err();
        assert_eq!(err.code(), 14);
    }

    #[test]
    fn unset_removes_field() {
        let mut d = doc! { "a": 1, "b": 2 };
        assert!(apply(&mut d, doc! { "$unset": { "a": "" } }));
        assert!(!d.contains_key("a"));
        assert!(!apply(&mut d, doc! { "$unset": { "a": "" } }));
    }

    // ── $inc / $mul ─────────────────────────────────────────────

    #[test]
    fn inc_existing_and_missing() {
        let mut d = doc! { "score": 10 };
        assert!(apply(&mut d, doc! { "$inc": { "score": 5, "bonus": 3 } }));
        assert_eq!(d.get_i32("score").unwrap(), 15);
        assert_eq!(d.get_i32("bonus").unwrap(), 3);
    }

    #[test]
    fn inc_overflow_promotes_to_i64() {
        let mut d = doc! { "n": i32::MAX };
        apply(&mut d, doc! { "$inc": { "n": 1 } });
        assert_eq!(d.get_i64("n").unwrap(), i32::MAX as i64 + 1);
    }

    #[test]
    fn inc_double_contagion() {
        let mut d = doc! { "n": 10 };
        apply(&mut d, doc! { "$inc": { "n": 0.5 } });
        assert_eq!(d.get_f64("n").unwrap(), 10.5);
    }

    #[test]
    fn inc_non_numeric_errors() {
        let mut d = doc! { "name": "alice" };
        let expr = ops(doc! { "$inc": { "name": 1 } });
        assert!(apply_update(&expr, &mut d, false).is_err());
    }

    #[test]
    fn mul_existing_and_missing() {
        let mut d = doc! { "price": 10 };
        apply(&mut d, doc! { "$mul": { "price": 3 } });
        assert_eq!(d.get_i32("price").unwrap(), 30);

        apply(&mut d, doc! { "$mul": { "absent": 7 } });
        assert_eq!(d.get_i32("absent").unwrap(), 0);
    }

    // ── $min / $max ─────────────────────────────────────────────

    #[test]
    fn min_max_replace_only_when_beyond() {
        let mut d = doc! { "low": 10, "high": 10 };
        assert!(apply(&mut d, doc! { "$min": { "low": 5 } }));
        assert!(!apply(&mut d, doc! { "$min": { "low": 7 } }));
        assert_eq!(d.get_i32("low").unwrap(), 5);

        assert!(apply(&mut d, doc! { "$max": { "high": 20 } }));
        assert!(!apply(&mut d, doc! { "$max": { "high": 15 } }));
        assert_eq!(d.get_i32("high").unwrap(), 20);
    }

    #[test]
    fn min_sets_missing_field() {
        let mut d = doc! {};
        assert!(apply(&mut d, doc! { "$min": { "n": 4 } }));
        assert_eq!(d.get_i32("n").unwrap(), 4);
    }

    // ── $rename / $currentDate ──────────────────────────────────

    #[test]
    fn rename_moves_value() {
        let mut d = doc! { "old": "v" };
        assert!(apply(&mut d, doc! { "$rename": { "old": "new" } }));
        assert!(!d.contains_key("old"));
        assert_eq!(d.get_str("new").unwrap(), "v");
        assert!(!apply(&mut d, doc! { "$rename": { "old": "other" } }));
    }

    #[test]
    fn rename_into_nested_path() {
        let mut d = doc! { "v": 1 };
        assert!(apply(&mut d, doc! { "$rename": { "v": "meta.v" } }));
        assert_eq!(d, doc! { "meta": { "v": 1 } });
    }

    #[test]
    fn current_date_sets_datetime() {
        let mut d = doc! {};
        assert!(apply(&mut d, doc! { "$currentDate": { "ts": true } }));
        assert!(matches!(d.get("ts"), Some(Bson::DateTime(_))));
    }

    // ── Array operators ─────────────────────────────────────────

    #[test]
    fn push_and_push_all() {
        let mut d = doc! { "tags": ["a"] };
        apply(&mut d, doc! { "$push": { "tags": "b" } });
        apply(&mut d, doc! { "$pushAll": { "tags": ["c", "d"] } });
        assert_eq!(d.get_array("tags").unwrap().len(), 4);

        let mut fresh = doc! {};
        apply(&mut fresh, doc! { "$push": { "tags": "x" } });
        assert_eq!(fresh.get_array("tags").unwrap().len(), 1);
    }

    #[test]
    fn push_on_non_array_errors() {
        let mut d = doc! { "tags": "scalar" };
        let expr = ops(doc! { "$push": { "tags": "x" } });
        assert!(apply_update(&expr, &mut d, false).is_err());
    }

    #[test]
    fn pull_removes_all_equal_values() {
        let mut d = doc! { "n": [1, 2, 1, 3, 1] };
        assert!(apply(&mut d, doc! { "$pull": { "n": 1 } }));
        assert_eq!(d.get_array("n").unwrap().len(), 2);
        assert!(!apply(&mut d, doc! { "$pull": { "n": 99 } }));
    }

    #[test]
    fn pull_all_removes_listed_values() {
        let mut d = doc! { "n": [1, 2, 3, 4] };
        assert!(apply(&mut d, doc! { "$pullAll": { "n": [2, 4] } }));
        assert_eq!(d.get_array("n").unwrap(), &vec![Bson::Int32(1), Bson::Int32(3)]);
    }

    #[test]
    fn pop_by_sign() {
        let mut d = doc! { "n": [1, 2, 3] };
        apply(&mut d, doc! { "$pop": { "n": 1 } });
        assert_eq!(d.get_array("n").unwrap(), &vec![Bson::Int32(1), Bson::Int32(2)]);
        apply(&mut d, doc! { "$pop": { "n": -1 } });
        assert_eq!(d.get_array("n").unwrap(), &vec![Bson::Int32(2)]);
    }

    #[test]
    fn add_to_set_dedups() {
        let mut d = doc! { "tags": ["a"] };
        assert!(apply(&mut d, doc! { "$addToSet": { "tags": "b" } }));
        assert!(!apply(&mut d, doc! { "$addToSet": { "tags": "a" } }));
        assert_eq!(d.get_array("tags").unwrap().len(), 2);
    }

    // ── $bit ────────────────────────────────────────────────────

    #[test]
    fn bit_and_or_xor() {
        let mut d = doc! { "flags": 0b1100 };
        apply(&mut d, doc! { "$bit": { "flags": { "and": 0b1010_i64 } } });
        assert_eq!(d.get_i64("flags").unwrap(), 0b1000);
        apply(&mut d, doc! { "$bit": { "flags": { "or": 0b0001_i64 } } });
        assert_eq!(d.get_i64("flags").unwrap(), 0b1001);
        apply(&mut d, doc! { "$bit": { "flags": { "xor": 0b1001_i64 } } });
        assert_eq!(d.get_i64("flags").unwrap(), 0);
    }

    #[test]
    fn bit_non_integer_errors() {
        let mut d = doc! { "flags": "nope" };
        let expr = ops(doc! { "$bit": { "flags": { "or": 1_i64 } } });
        assert!(apply_update(&expr, &mut d, false).is_err());
    }

    // ── $setOnInsert ────────────────────────────────────────────

    #[test]
    fn set_on_insert_gated_by_path() {
        let mut d = doc! {};
        let expr = ops(doc! { "$setOnInsert": { "created": true } });
        assert!(!apply_update(&expr, &mut d, false).unwrap());
        assert!(!d.contains_key("created"));

        assert!(apply_update(&expr, &mut d, true).unwrap());
        assert_eq!(d.get_bool("created").unwrap(), true);
    }

    // ── Upsert synthesis ────────────────────────────────────────

    #[test]
    fn replacement_update_becomes_document() {
        let update = parse_update(&doc! { "name": "alice", "age": 30 }).unwrap();
        let doc =
            doc_from_update(&doc! { "name": "alice" }, &update, Bson::String("gen".into()))
                .unwrap();
        assert_eq!(doc.get_str("_id").unwrap(), "gen");
        assert_eq!(doc.get_str("name").unwrap(), "alice");
        assert_eq!(doc.get_i32("age").unwrap(), 30);
    }

    #[test]
    fn operator_update_seeds_from_query_literals() {
        let update = parse_update(&doc! { "$inc": { "count": 1 } }).unwrap();
        let query = doc! { "name": "alice", "score": { "$gt": 5 } };
        let doc = doc_from_update(&query, &update, Bson::String("gen".into())).unwrap();
        // literal equality seeds, operator clause does not
        assert_eq!(doc.get_str("name").unwrap(), "alice");
        assert!(!doc.contains_key("score"));
        assert_eq!(doc.get_i32("count").unwrap(), 1);
    }

    #[test]
    fn set_on_insert_applies_during_synthesis() {
        let update =
            parse_update(&doc! { "$set": { "a": 1 }, "$setOnInsert": { "b": 2 } }).unwrap();
        let doc = doc_from_update(&doc! {}, &update, Bson::String("gen".into())).unwrap();
        assert_eq!(doc.get_i32("a").unwrap(), 1);
        assert_eq!(doc.get_i32("b").unwrap(), 2);
    }

    #[test]
    fn dotted_query_literal_seeds_nested_field() {
        let update = parse_update(&doc! { "$set": { "x": 1 } }).unwrap();
        let doc = doc_from_update(
            &doc! { "address.city": "Austin" },
            &update,
            Bson::String("gen".into()),
        )
        .unwrap();
        assert_eq!(doc.get_document("address").unwrap().get_str("city").unwrap(), "Austin");
    }
}

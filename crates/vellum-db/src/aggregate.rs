use std::collections::HashMap;

use bson::{Bson, Document};
use vellum_query::{Projection, parse_filter, parse_sort};

use crate::cursor;
use crate::error::DbError;
use crate::index;
use crate::matcher::{self, MatchContext};

/// Run an aggregation pipeline over a materialized batch of documents.
///
/// Execution is strictly sequential and eager: each stage consumes the
/// array produced by the previous one. Unknown stage names are fatal.
pub fn run_pipeline(
    mut docs: Vec<Document>,
    pipeline: &[Document],
    ctx: &MatchContext,
) -> Result<Vec<Document>, DbError> {
    for stage in pipeline {
        if stage.len() != 1 {
            return Err(DbError::BadValue(
                "pipeline stage must have exactly one operator".into(),
            ));
        }
        let (name, spec) = stage.iter().next().unwrap();
        docs = match name.as_str() {
            "$match" => stage_match(docs, spec, ctx)?,
            "$project" => stage_project(docs, spec)?,
            "$sort" => stage_sort(docs, spec)?,
            "$skip" => {
                let n = stage_usize(name, spec)?;
                if n >= docs.len() { Vec::new() } else { docs.split_off(n) }
            }
            "$limit" => {
                let n = stage_usize(name, spec)?;
                docs.truncate(n);
                docs
            }
            "$count" => stage_count(docs, spec)?,
            "$unwind" => stage_unwind(docs, spec)?,
            "$group" => stage_group(docs, spec, ctx)?,
            other => {
                return Err(DbError::BadValue(format!(
                    "unknown pipeline stage: {other}"
                )));
            }
        };
    }
    Ok(docs)
}

fn stage_match(
    docs: Vec<Document>,
    spec: &Bson,
    ctx: &MatchContext,
) -> Result<Vec<Document>, DbError> {
    let filter = match spec {
        Bson::Document(d) => d,
        _ => return Err(DbError::BadValue("$match spec must be a document".into())),
    };
    let expr = parse_filter(filter)?;
    Ok(docs
        .into_iter()
        .filter(|doc| matcher::matches(doc, &expr, ctx))
        .collect())
}

fn stage_project(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>, DbError> {
    let projection = match spec {
        Bson::Document(d) => Projection::parse(d)?,
        _ => return Err(DbError::BadValue("$project spec must be a document".into())),
    };
    Ok(docs.iter().map(|doc| projection.apply(doc)).collect())
}

fn stage_sort(mut docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>, DbError> {
    let specs = match spec {
        Bson::Document(d) => parse_sort(d)?,
        _ => return Err(DbError::BadValue("$sort spec must be a document".into())),
    };
    cursor::sort_documents(&mut docs, &specs);
    Ok(docs)
}

fn stage_usize(name: &str, spec: &Bson) -> Result<usize, DbError> {
    match spec {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(DbError::BadValue(format!(
            "{name} spec must be a non-negative integer"
        ))),
    }
}

/// `$count` replaces the batch with one single-field summary document.
fn stage_count(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>, DbError> {
    let field = match spec {
        Bson::String(s) if !s.is_empty() => s,
        _ => return Err(DbError::BadValue("$count spec must be a field name".into())),
    };
    let mut summary = Document::new();
    summary.insert(field.clone(), Bson::Int64(docs.len() as i64));
    Ok(vec![summary])
}

/// `$unwind` emits one document per element of the target array, with the
/// array field replaced in place. Documents whose field is empty, absent,
/// or not an array are dropped.
fn stage_unwind(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>, DbError> {
    let path = match spec {
        Bson::String(s) if s.starts_with('$') => &s[1..],
        _ => {
            return Err(DbError::BadValue(
                "$unwind spec must be a $-prefixed field path".into(),
            ));
        }
    };

    let mut out = Vec::new();
    for doc in docs {
        let elements = match matcher::get_path(&doc, path) {
            Some(Bson::Array(arr)) if !arr.is_empty() => arr.clone(),
            _ => continue,
        };
        for element in elements {
            let mut copy = doc.clone();
            set_path(&mut copy, path, element);
            out.push(copy);
        }
    }
    Ok(out)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((top, rest)) => {
            if let Some(Bson::Document(sub)) = doc.get_mut(top) {
                set_path(sub, rest, value);
            }
        }
    }
}

// ── $group ──────────────────────────────────────────────────────

/// Resolve a group-key / accumulator operand against one document:
/// a `"$path"` string is a field reference, a document resolves its
/// members recursively, anything else is a literal. `None` means the
/// referenced field is missing.
fn resolve_operand(doc: &Document, operand: &Bson) -> Option<Bson> {
    match operand {
        Bson::String(s) if s.starts_with('$') => matcher::get_path(doc, &s[1..]).cloned(),
        Bson::Document(members) => {
            let mut out = Document::new();
            for (key, sub) in members.iter() {
                if let Some(value) = resolve_operand(doc, sub) {
                    out.insert(key.clone(), value);
                }
            }
            Some(Bson::Document(out))
        }
        other => Some(other.clone()),
    }
}

fn stage_group(
    docs: Vec<Document>,
    spec: &Bson,
    _ctx: &MatchContext,
) -> Result<Vec<Document>, DbError> {
    let spec = match spec {
        Bson::Document(d) => d,
        _ => return Err(DbError::BadValue("$group spec must be a document".into())),
    };
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| DbError::BadValue("$group requires an _id key expression".into()))?;

    // Validate accumulators up front; an unknown name is fatal before
    // any bucket work happens.
    let mut accumulators: Vec<(&str, &str, &Bson)> = Vec::new();
    for (field, acc) in spec.iter() {
        if field == "_id" {
            continue;
        }
        let acc_doc = match acc {
            Bson::Document(d) if d.len() == 1 => d,
            _ => {
                return Err(DbError::BadValue(format!(
                    "accumulator for '{field}' must be a single-operator document"
                )));
            }
        };
        let (name, operand) = acc_doc.iter().next().unwrap();
        match name.as_str() {
            "$sum" | "$avg" | "$min" | "$max" | "$push" | "$addToSet" | "$first" | "$last" => {}
            other => {
                return Err(DbError::BadValue(format!(
                    "unknown group accumulator: {other}"
                )));
            }
        }
        accumulators.push((field, name, operand));
    }

    // Bucket in encounter order, keyed by the canonical value encoding so
    // numerically equal keys of different widths share a bucket.
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, (Bson, Vec<Document>)> = HashMap::new();
    for doc in docs {
        let key_value = resolve_operand(&doc, key_expr).unwrap_or(Bson::Null);
        let key = index::encode_value(&key_value);
        let entry = buckets.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (key_value, Vec::new())
        });
        entry.1.push(doc);
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let (key_value, members) = buckets.remove(&key).expect("bucket recorded in order");
        let mut result = Document::new();
        result.insert("_id", key_value);
        for (field, name, operand) in &accumulators {
            let value = fold_accumulator(name, operand, &members);
            result.insert(field.to_string(), value);
        }
        out.push(result);
    }
    Ok(out)
}

fn fold_accumulator(name: &str, operand: &Bson, members: &[Document]) -> Bson {
    match name {
        "$sum" => numeric_fold(operand, members, true),
        "$avg" => numeric_fold(operand, members, false),
        "$min" => extremum(operand, members, std::cmp::Ordering::Less),
        "$max" => extremum(operand, members, std::cmp::Ordering::Greater),
        "$push" => Bson::Array(
            members
                .iter()
                .filter_map(|doc| resolve_operand(doc, operand))
                .collect(),
        ),
        "$addToSet" => {
            let mut set: Vec<Bson> = Vec::new();
            for doc in members {
                if let Some(value) = resolve_operand(doc, operand) {
                    if !set.iter().any(|e| matcher::values_eq(e, &value)) {
                        set.push(value);
                    }
                }
            }
            Bson::Array(set)
        }
        "$first" => members
            .first()
            .and_then(|doc| resolve_operand(doc, operand))
            .unwrap_or(Bson::Null),
        "$last" => members
            .last()
            .and_then(|doc| resolve_operand(doc, operand))
            .unwrap_or(Bson::Null),
        _ => unreachable!("accumulators validated up front"),
    }
}

/// Shared `$sum`/`$avg` fold. Non-numeric resolved values contribute
/// nothing; an all-integer sum stays integral, any double makes the
/// result a double. `$avg` over zero numeric values is null.
fn numeric_fold(operand: &Bson, members: &[Document], sum: bool) -> Bson {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;
    let mut count: usize = 0;

    for doc in members {
        match resolve_operand(doc, operand) {
            Some(Bson::Int32(n)) => {
                int_total += n as i64;
                count += 1;
            }
            Some(Bson::Int64(n)) => {
                int_total += n;
                count += 1;
            }
            Some(Bson::Double(d)) => {
                float_total += d;
                saw_float = true;
                count += 1;
            }
            _ => {}
        }
    }

    if sum {
        if saw_float {
            Bson::Double(float_total + int_total as f64)
        } else {
            Bson::Int64(int_total)
        }
    } else if count == 0 {
        Bson::Null
    } else {
        Bson::Double((float_total + int_total as f64) / count as f64)
    }
}

fn extremum(operand: &Bson, members: &[Document], wanted: std::cmp::Ordering) -> Bson {
    let mut best: Option<Bson> = None;
    for doc in members {
        let Some(value) = resolve_operand(doc, operand) else { continue };
        best = match best {
            None => Some(value),
            Some(current) => {
                if matcher::compare_values(&value, &current) == Some(wanted) {
                    Some(value)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.unwrap_or(Bson::Null)
}

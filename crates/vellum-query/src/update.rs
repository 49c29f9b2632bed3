use bson::{Bson, Document};

use crate::error::QueryError;

/// A parsed update document.
#[derive(Debug, Clone)]
pub enum UpdateDocument {
    /// No operator-prefixed keys: the whole document replaces the target.
    Replacement(Document),
    /// Operator form: a list of per-field operations in document order.
    Operators(UpdateExpr),
}

#[derive(Debug, Clone, Default)]
pub struct UpdateExpr {
    pub ops: Vec<FieldUpdate>,
}

#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub field: String,
    pub op: UpdateOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone)]
pub enum UpdateOp {
    Set(Bson),
    /// Applied only while synthesizing an upsert document.
    SetOnInsert(Bson),
    Unset,
    Inc(Bson),
    Mul(Bson),
    Rename(String),
    Min(Bson),
    Max(Bson),
    CurrentDate,
    Push(Bson),
    PushAll(Vec<Bson>),
    /// Value-based removal of every equal element — not a predicate pull.
    Pull(Bson),
    PullAll(Vec<Bson>),
    /// 1 removes the last element, -1 the first.
    Pop(i32),
    AddToSet(Bson),
    Bit { op: BitOp, operand: i64 },
}

/// Parse an update document.
///
/// A document whose keys all lack the `$` prefix is a replacement; one
/// whose keys all carry it is an operator expression. Mixing the two, or
/// naming an operator the engine does not know, is a hard error — update
/// operators are never silently skipped.
pub fn parse_update(doc: &Document) -> Result<UpdateDocument, QueryError> {
    let prefixed = doc.keys().filter(|k| k.starts_with('$')).count();
    if prefixed == 0 {
        return Ok(UpdateDocument::Replacement(doc.clone()));
    }
    if prefixed != doc.len() {
        return Err(QueryError::BadValue(
            "update document mixes operators and plain fields".into(),
        ));
    }

    let mut expr = UpdateExpr::default();
    for (op_key, operand) in doc.iter() {
        let fields = match operand {
            Bson::Document(fields) => fields,
            _ => {
                return Err(QueryError::BadValue(format!(
                    "{op_key} operand must be a document of field paths"
                )));
            }
        };
        for (field, value) in fields.iter() {
            expr.ops.push(FieldUpdate {
                field: field.clone(),
                op: parse_op(op_key, field, value)?,
            });
        }
    }
    Ok(UpdateDocument::Operators(expr))
}

fn parse_op(op_key: &str, field: &str, value: &Bson) -> Result<UpdateOp, QueryError> {
    let op = match op_key {
        "$set" => UpdateOp::Set(value.clone()),
        "$setOnInsert" => UpdateOp::SetOnInsert(value.clone()),
        "$unset" => UpdateOp::Unset,
        "$inc" => UpdateOp::Inc(numeric_operand(op_key, field, value)?),
        "$mul" => UpdateOp::Mul(numeric_operand(op_key, field, value)?),
        "$rename" => match value {
            Bson::String(new_name) => UpdateOp::Rename(new_name.clone()),
            _ => {
                return Err(QueryError::BadValue(format!(
                    "$rename target for '{field}' must be a string"
                )));
            }
        },
        "$min" => UpdateOp::Min(value.clone()),
        "$max" => UpdateOp::Max(value.clone()),
        "$currentDate" => UpdateOp::CurrentDate,
        "$push" => UpdateOp::Push(value.clone()),
        "$pushAll" => UpdateOp::PushAll(array_operand(op_key, field, value)?),
        "$pull" => UpdateOp::Pull(value.clone()),
        "$pullAll" => UpdateOp::PullAll(array_operand(op_key, field, value)?),
        "$pop" => match value {
            Bson::Int32(1) | Bson::Int64(1) => UpdateOp::Pop(1),
            Bson::Int32(-1) | Bson::Int64(-1) => UpdateOp::Pop(-1),
            _ => {
                return Err(QueryError::BadValue(format!(
                    "$pop value for '{field}' must be 1 or -1"
                )));
            }
        },
        "$addToSet" => UpdateOp::AddToSet(value.clone()),
        "$bit" => parse_bit(field, value)?,
        k => {
            return Err(QueryError::BadValue(format!("unknown update operator: {k}")));
        }
    };
    Ok(op)
}

fn numeric_operand(op: &str, field: &str, value: &Bson) -> Result<Bson, QueryError> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Ok(value.clone()),
        _ => Err(QueryError::TypeMismatch(format!(
            "{op} amount for '{field}' must be numeric"
        ))),
    }
}

fn array_operand(op: &str, field: &str, value: &Bson) -> Result<Vec<Bson>, QueryError> {
    match value {
        Bson::Array(a) => Ok(a.clone()),
        _ => Err(QueryError::TypeMismatch(format!(
            "{op} operand for '{field}' must be an array"
        ))),
    }
}

/// `$bit` operand is a single-key document: `{ and|or|xor: <int> }`.
fn parse_bit(field: &str, value: &Bson) -> Result<UpdateOp, QueryError> {
    let spec = match value {
        Bson::Document(d) if d.len() == 1 => d,
        _ => {
            return Err(QueryError::BadValue(format!(
                "$bit operand for '{field}' must be a single-key document"
            )));
        }
    };
    let (name, operand) = spec.iter().next().unwrap();
    let op = match name.as_str() {
        "and" => BitOp::And,
        "or" => BitOp::Or,
        "xor" => BitOp::Xor,
        other => {
            return Err(QueryError::BadValue(format!(
                "$bit operation must be and/or/xor, got {other}"
            )));
        }
    };
    let operand = match operand {
        Bson::Int32(n) => *n as i64,
        Bson::Int64(n) => *n,
        _ => {
            return Err(QueryError::TypeMismatch(format!(
                "$bit operand for '{field}' must be an integer"
            )));
        }
    };
    Ok(UpdateOp::Bit { op, operand })
}

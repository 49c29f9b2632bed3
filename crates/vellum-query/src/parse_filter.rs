use bson::{Bson, Document};
use regex::Regex;

use crate::error::QueryError;
use crate::expression::{ElemMatch, Expression, FieldCond, FieldOp};

/// Parse a filter document into an [`Expression`] tree.
///
/// Follows MongoDB query semantics:
/// - Top-level document is an implicit AND of all entries
/// - `{ "field": value }` is implicit `$eq`
/// - `{ "field": { "$gt": v } }` uses operator sub-documents
/// - `{ "$or": [...] }` / `{ "$and": [...] }` / `{ "$nor": [...] }` for
///   explicit logical ops, `{ "$not": {...} }` to negate a sub-expression
/// - `{ "$where": "name" }` refers to a registered predicate
/// - `{ "field": { "$regex": "pattern", "$options": "i" } }` for regex
///
/// An unknown `$`-prefixed key, at either level, is a hard error — the
/// engine never silently drops an operator it does not understand.
pub fn parse_filter(doc: &Document) -> Result<Expression, QueryError> {
    let mut children = Vec::new();

    for (key, value) in doc.iter() {
        match key.as_str() {
            "$and" => children.push(parse_logical_array(value, Expression::And)?),
            "$or" => children.push(parse_logical_array(value, Expression::Or)?),
            "$nor" => children.push(parse_logical_array(value, Expression::Nor)?),
            "$not" => match value {
                Bson::Document(sub) => {
                    children.push(Expression::Not(Box::new(parse_filter(sub)?)));
                }
                _ => return Err(QueryError::BadValue("$not value must be a document".into())),
            },
            "$where" => match value {
                Bson::String(name) => children.push(Expression::Where(name.clone())),
                Bson::JavaScriptCode(name) => children.push(Expression::Where(name.clone())),
                _ => {
                    return Err(QueryError::BadValue(
                        "$where value must name a registered predicate".into(),
                    ));
                }
            },
            k if k.starts_with('$') => {
                return Err(QueryError::BadValue(format!(
                    "unknown top-level operator: {k}"
                )));
            }
            _ => children.push(parse_field_condition(key, value)?),
        }
    }

    // An empty filter matches every document — find({}) is a full scan.
    if children.len() == 1 {
        Ok(children.pop().unwrap())
    } else {
        Ok(Expression::And(children))
    }
}

/// Parse a `$and` / `$or` / `$nor` array value into a logical expression.
fn parse_logical_array(
    value: &Bson,
    make: fn(Vec<Expression>) -> Expression,
) -> Result<Expression, QueryError> {
    let arr = match value {
        Bson::Array(a) => a,
        _ => {
            return Err(QueryError::BadValue(
                "logical operator value must be an array".into(),
            ));
        }
    };

    let mut children = Vec::new();
    for elem in arr {
        match elem {
            Bson::Document(sub) => children.push(parse_filter(sub)?),
            _ => {
                return Err(QueryError::BadValue(
                    "logical operator array elements must be documents".into(),
                ));
            }
        }
    }

    if children.is_empty() {
        return Err(QueryError::BadValue(
            "logical operator array must not be empty".into(),
        ));
    }

    Ok(make(children))
}

/// Parse a field condition: either implicit equality or an operator doc.
///
/// A sub-document's keys must be homogeneous — either every key carries the
/// `$` prefix (operator document) or none does (literal embedded document).
fn parse_field_condition(field: &str, value: &Bson) -> Result<Expression, QueryError> {
    let cond = match value {
        Bson::Document(sub) if !sub.is_empty() => {
            let prefixed = sub.keys().filter(|k| k.starts_with('$')).count();
            if prefixed == sub.len() {
                FieldCond::Ops(parse_operator_doc(field, sub)?)
            } else if prefixed == 0 {
                FieldCond::Literal(value.clone())
            } else {
                return Err(QueryError::BadValue(format!(
                    "field '{field}' mixes operators and plain keys"
                )));
            }
        }
        Bson::RegularExpression(re) => FieldCond::Ops(vec![FieldOp::Regex(compile_regex(
            re.pattern.as_str(),
            Some(re.options.as_str()),
        )?)]),
        _ => FieldCond::Literal(value.clone()),
    };

    Ok(Expression::Field {
        path: field.to_string(),
        cond,
    })
}

/// Parse an operator sub-document like `{ "$gt": 21, "$lte": 100 }`.
fn parse_operator_doc(field: &str, doc: &Document) -> Result<Vec<FieldOp>, QueryError> {
    // $regex needs special handling (consumes its $options sibling).
    if doc.contains_key("$regex") {
        return Ok(vec![parse_regex(field, doc)?]);
    }

    let mut ops = Vec::new();
    for (op_key, op_value) in doc.iter() {
        ops.push(parse_operator(field, op_key, op_value)?);
    }
    Ok(ops)
}

fn parse_operator(field: &str, op_key: &str, op_value: &Bson) -> Result<FieldOp, QueryError> {
    let op = match op_key {
        "$eq" => FieldOp::Eq(op_value.clone()),
        "$ne" => FieldOp::Ne(op_value.clone()),
        "$gt" => FieldOp::Gt(op_value.clone()),
        "$gte" => FieldOp::Gte(op_value.clone()),
        "$lt" => FieldOp::Lt(op_value.clone()),
        "$lte" => FieldOp::Lte(op_value.clone()),
        "$in" => FieldOp::In(operand_array(op_key, op_value)?),
        "$nin" => FieldOp::Nin(operand_array(op_key, op_value)?),
        "$all" => FieldOp::All(operand_array(op_key, op_value)?),
        "$exists" => match op_value {
            Bson::Boolean(b) => FieldOp::Exists(*b),
            _ => return Err(QueryError::BadValue("$exists value must be a boolean".into())),
        },
        "$type" => match op_value {
            Bson::String(name) => FieldOp::Type(name.clone()),
            _ => return Err(QueryError::BadValue("$type value must be a type name".into())),
        },
        "$size" => match op_value {
            Bson::Int32(n) => FieldOp::Size(*n as i64),
            Bson::Int64(n) => FieldOp::Size(*n),
            _ => return Err(QueryError::BadValue("$size value must be an integer".into())),
        },
        "$mod" => parse_mod(op_value)?,
        "$text" => match op_value {
            Bson::String(query) => FieldOp::Text(query.clone()),
            _ => return Err(QueryError::BadValue("$text value must be a string".into())),
        },
        "$geoWithin" => match op_value {
            Bson::Document(shape) => FieldOp::GeoWithin(shape.clone()),
            _ => {
                return Err(QueryError::BadValue(
                    "$geoWithin value must be a geometry document".into(),
                ));
            }
        },
        "$not" => match op_value {
            Bson::Document(sub) if !sub.is_empty() => {
                FieldOp::Not(parse_operator_doc(field, sub)?)
            }
            _ => {
                return Err(QueryError::BadValue(
                    "$not value must be an operator document".into(),
                ));
            }
        },
        "$elemMatch" => match op_value {
            Bson::Document(sub) if !sub.is_empty() => {
                let first_prefixed = sub.keys().next().is_some_and(|k| k.starts_with('$'));
                if first_prefixed {
                    FieldOp::ElemMatch(ElemMatch::Ops(parse_operator_doc(field, sub)?))
                } else {
                    FieldOp::ElemMatch(ElemMatch::Query(Box::new(parse_filter(sub)?)))
                }
            }
            _ => {
                return Err(QueryError::BadValue(
                    "$elemMatch value must be a non-empty document".into(),
                ));
            }
        },
        "$options" => {
            return Err(QueryError::BadValue("$options without $regex".into()));
        }
        k => {
            return Err(QueryError::BadValue(format!("unknown field operator: {k}")));
        }
    };
    Ok(op)
}

fn operand_array(op: &str, value: &Bson) -> Result<Vec<Bson>, QueryError> {
    match value {
        Bson::Array(a) => Ok(a.clone()),
        _ => Err(QueryError::BadValue(format!("{op} value must be an array"))),
    }
}

/// `$mod` takes a two-element `[divisor, remainder]` array; anything else
/// is malformed and rejected up front.
fn parse_mod(value: &Bson) -> Result<FieldOp, QueryError> {
    let arr = match value {
        Bson::Array(a) if a.len() == 2 => a,
        _ => {
            return Err(QueryError::BadValue(
                "malformed $mod: expected [divisor, remainder]".into(),
            ));
        }
    };
    let as_i64 = |v: &Bson| match v {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(d) => Some(*d as i64),
        _ => None,
    };
    let divisor = as_i64(&arr[0])
        .ok_or_else(|| QueryError::BadValue("malformed $mod: divisor must be numeric".into()))?;
    let remainder = as_i64(&arr[1])
        .ok_or_else(|| QueryError::BadValue("malformed $mod: remainder must be numeric".into()))?;
    if divisor == 0 {
        return Err(QueryError::BadValue("malformed $mod: divisor is zero".into()));
    }
    Ok(FieldOp::Mod { divisor, remainder })
}

/// Parse a `$regex` + optional `$options` sub-document.
fn parse_regex(field: &str, doc: &Document) -> Result<FieldOp, QueryError> {
    let mut pattern: Option<&str> = None;
    let mut options: Option<&str> = None;

    for (key, value) in doc.iter() {
        match key.as_str() {
            "$regex" => match value {
                Bson::String(s) => pattern = Some(s.as_str()),
                Bson::RegularExpression(re) => {
                    pattern = Some(re.pattern.as_str());
                    if !re.options.is_empty() {
                        options = Some(re.options.as_str());
                    }
                }
                _ => return Err(QueryError::BadValue("$regex value must be a string".into())),
            },
            "$options" => match value {
                Bson::String(s) => options = Some(s.as_str()),
                _ => return Err(QueryError::BadValue("$options value must be a string".into())),
            },
            k => {
                return Err(QueryError::BadValue(format!(
                    "unexpected key alongside $regex on '{field}': {k}"
                )));
            }
        }
    }

    let pat = pattern.ok_or_else(|| QueryError::BadValue("missing $regex pattern".into()))?;
    Ok(FieldOp::Regex(compile_regex(pat, options)?))
}

fn compile_regex(pattern: &str, options: Option<&str>) -> Result<Regex, QueryError> {
    let full_pattern = if let Some(opts) = options.filter(|o| !o.is_empty()) {
        let mut prefix = String::with_capacity(4 + opts.len() + pattern.len());
        prefix.push_str("(?");
        for ch in opts.chars() {
            match ch {
                'i' | 's' | 'm' | 'x' => prefix.push(ch),
                c => return Err(QueryError::BadValue(format!("unknown regex option: {c}"))),
            }
        }
        prefix.push(')');
        prefix.push_str(pattern);
        prefix
    } else {
        pattern.to_string()
    };

    Regex::new(&full_pattern)
        .map_err(|e| QueryError::BadValue(format!("invalid regex pattern: {e}")))
}

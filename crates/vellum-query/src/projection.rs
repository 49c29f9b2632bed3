use std::collections::{HashMap, HashSet};

use bson::{Bson, Document};

use crate::error::QueryError;

/// A validated projection document.
///
/// Inclusion and exclusion cannot be mixed — the only field exempt from
/// that rule is `_id`, which is independently toggleable.
#[derive(Debug, Clone)]
pub enum Projection {
    /// Keep only the listed paths. `_id` rides along unless excluded.
    Include { fields: Vec<String>, id: bool },
    /// Start from the full document and drop the listed paths.
    Exclude { fields: Vec<String> },
}

impl Projection {
    pub fn parse(doc: &Document) -> Result<Projection, QueryError> {
        let mut include: Vec<String> = Vec::new();
        let mut exclude: Vec<String> = Vec::new();
        let mut id = true;
        let mut id_explicit = false;

        for (key, value) in doc.iter() {
            let keep = match value {
                Bson::Int32(n) => *n != 0,
                Bson::Int64(n) => *n != 0,
                Bson::Double(d) => *d != 0.0,
                Bson::Boolean(b) => *b,
                _ => {
                    return Err(QueryError::BadValue(format!(
                        "projection value for '{key}' must be 0 or 1"
                    )));
                }
            };

            if key == "_id" {
                id = keep;
                id_explicit = true;
                continue;
            }
            if keep {
                include.push(key.clone());
            } else {
                exclude.push(key.clone());
            }
        }

        if !include.is_empty() && !exclude.is_empty() {
            return Err(QueryError::BadValue(
                "projection cannot mix inclusion and exclusion".into(),
            ));
        }

        if !include.is_empty() {
            Ok(Projection::Include { fields: include, id })
        } else if !exclude.is_empty() {
            if !id {
                exclude.push("_id".to_string());
            }
            Ok(Projection::Exclude { fields: exclude })
        } else if id_explicit {
            // `{_id: 1}` keeps only `_id`; `{_id: 0}` drops only `_id`.
            if id {
                Ok(Projection::Include { fields: Vec::new(), id: true })
            } else {
                Ok(Projection::Exclude { fields: vec!["_id".to_string()] })
            }
        } else {
            // Empty projection keeps the whole document.
            Ok(Projection::Exclude { fields: Vec::new() })
        }
    }

    /// Apply the projection to one document, producing a trimmed copy.
    /// Invoked at yield time only, never during matching.
    pub fn apply(&self, doc: &Document) -> Document {
        match self {
            Projection::Include { fields, id } => include_paths(doc, fields, *id),
            Projection::Exclude { fields } => {
                let mut out = doc.clone();
                for path in fields {
                    remove_path(&mut out, path);
                }
                out
            }
        }
    }
}

/// Build a document containing only the requested paths, preserving the
/// source field order. Dotted paths keep just the named sub-path, the
/// same nested-trim behaviour the collection's column projection has.
fn include_paths(doc: &Document, paths: &[String], id: bool) -> Document {
    let mut flat: HashSet<&str> = HashSet::new();
    let mut nested: HashMap<&str, Vec<String>> = HashMap::new();

    for path in paths {
        match path.split_once('.') {
            Some((top, rest)) => nested.entry(top).or_default().push(rest.to_string()),
            None => {
                flat.insert(path.as_str());
            }
        }
    }

    let mut out = Document::new();
    for (key, value) in doc.iter() {
        if key == "_id" {
            if id {
                out.insert(key.clone(), value.clone());
            }
            continue;
        }
        if flat.contains(key.as_str()) {
            out.insert(key.clone(), value.clone());
        } else if let (Some(sub_paths), Bson::Document(sub)) = (nested.get(key.as_str()), value) {
            let trimmed = include_paths(sub, sub_paths, false);
            out.insert(key.clone(), Bson::Document(trimmed));
        }
    }
    out
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((top, rest)) => {
            if let Some(Bson::Document(sub)) = doc.get_mut(top) {
                remove_path(sub, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn inclusion_keeps_id_and_listed_fields() {
        let p = Projection::parse(&doc! { "a": 1 }).unwrap();
        let out = p.apply(&doc! { "_id": 7, "a": 1, "b": 2 });
        assert_eq!(out, doc! { "_id": 7, "a": 1 });
    }

    #[test]
    fn inclusion_with_id_suppressed() {
        let p = Projection::parse(&doc! { "a": 1, "_id": 0 }).unwrap();
        let out = p.apply(&doc! { "_id": 7, "a": 1, "b": 2 });
        assert_eq!(out, doc! { "a": 1 });
    }

    #[test]
    fn exclusion_drops_listed_fields() {
        let p = Projection::parse(&doc! { "a": 0 }).unwrap();
        let out = p.apply(&doc! { "_id": 7, "a": 1, "b": 2 });
        assert_eq!(out, doc! { "_id": 7, "b": 2 });
    }

    #[test]
    fn id_only_inclusion() {
        let p = Projection::parse(&doc! { "_id": 1 }).unwrap();
        let out = p.apply(&doc! { "_id": 7, "a": 1 });
        assert_eq!(out, doc! { "_id": 7 });
    }

    #[test]
    fn id_only_exclusion() {
        let p = Projection::parse(&doc! { "_id": 0 }).unwrap();
        let out = p.apply(&doc! { "_id": 7, "a": 1 });
        assert_eq!(out, doc! { "a": 1 });
    }

    #[test]
    fn mixed_projection_rejected() {
        let err = Projection::parse(&doc! { "a": 1, "b": 0 }).unwrap_err();
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn mixed_with_id_is_allowed() {
        assert!(Projection::parse(&doc! { "a": 1, "_id": 0 }).is_ok());
        assert!(Projection::parse(&doc! { "a": 0, "_id": 1 }).is_ok());
    }

    #[test]
    fn non_flag_value_rejected() {
        assert!(Projection::parse(&doc! { "a": "yes" }).is_err());
    }

    #[test]
    fn dotted_inclusion_trims_nested() {
        let p = Projection::parse(&doc! { "address.city": 1 }).unwrap();
        let out = p.apply(&doc! {
            "_id": 1,
            "address": { "city": "Austin", "zip": "78701" },
            "name": "x"
        });
        assert_eq!(out, doc! { "_id": 1, "address": { "city": "Austin" } });
    }

    #[test]
    fn dotted_exclusion_removes_leaf() {
        let p = Projection::parse(&doc! { "address.zip": 0 }).unwrap();
        let out = p.apply(&doc! {
            "_id": 1,
            "address": { "city": "Austin", "zip": "78701" }
        });
        assert_eq!(out, doc! { "_id": 1, "address": { "city": "Austin" } });
    }

    #[test]
    fn empty_projection_keeps_document() {
        let p = Projection::parse(&doc! {}).unwrap();
        let src = doc! { "_id": 1, "a": 2 };
        assert_eq!(p.apply(&src), src);
    }
}

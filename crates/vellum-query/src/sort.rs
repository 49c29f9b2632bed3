use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Parse a `{ field: 1, other: -1 }` sort document, preserving key order.
pub fn parse_sort(doc: &Document) -> Result<Vec<SortSpec>, QueryError> {
    let mut specs = Vec::with_capacity(doc.len());
    for (field, value) in doc.iter() {
        let n = match value {
            Bson::Int32(n) => *n as i64,
            Bson::Int64(n) => *n,
            Bson::Double(d) => *d as i64,
            _ => {
                return Err(QueryError::BadValue(format!(
                    "sort direction for '{field}' must be 1 or -1"
                )));
            }
        };
        let direction = match n {
            1 => SortDirection::Asc,
            -1 => SortDirection::Desc,
            _ => {
                return Err(QueryError::BadValue(format!(
                    "sort direction for '{field}' must be 1 or -1"
                )));
            }
        };
        specs.push(SortSpec {
            field: field.clone(),
            direction,
        });
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn parses_directions_in_order() {
        let specs = parse_sort(&doc! { "a": 1, "b": -1 }).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].field, "a");
        assert_eq!(specs[0].direction, SortDirection::Asc);
        assert_eq!(specs[1].field, "b");
        assert_eq!(specs[1].direction, SortDirection::Desc);
    }

    #[test]
    fn rejects_other_directions() {
        assert!(parse_sort(&doc! { "a": 2 }).is_err());
        assert!(parse_sort(&doc! { "a": "asc" }).is_err());
    }
}

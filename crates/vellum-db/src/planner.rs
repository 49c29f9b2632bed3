use vellum_query::{Expression, FieldCond};

use crate::index::{self, IndexManager};

/// A usable index lookup: the index to consult and the exact key to probe.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPlan {
    pub index: String,
    pub key: String,
}

/// Decide whether a query can narrow its scan through an index.
///
/// First-match, not best-match: the planner walks registered single-field
/// indexes in creation order and picks the first whose field carries a
/// literal equality at the top level of the query. Operator documents,
/// compound indexes, and equalities buried under `$or`/`$nor`/`$not` all
/// force a full scan. There is no cost estimation — index use is purely an
/// optimization; the cursor re-checks the full predicate either way.
pub fn plan(expr: &Expression, indexes: &IndexManager) -> Option<IndexPlan> {
    let conjuncts: Vec<&Expression> = match expr {
        Expression::And(children) => children.iter().collect(),
        other => vec![other],
    };

    for index in indexes.iter().filter(|i| i.is_single_field()) {
        for conjunct in &conjuncts {
            if let Expression::Field { path, cond: FieldCond::Literal(lit) } = conjunct {
                if path == index.field() {
                    return Some(IndexPlan {
                        index: index.name().to_string(),
                        key: index::encode_value(lit),
                    });
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use vellum_query::{SortDirection, parse_filter};
    use vellum_store::MemoryStore;

    fn indexes_on(fields: &[&str]) -> IndexManager {
        let store = MemoryStore::new();
        let mut manager = IndexManager::new();
        for field in fields {
            manager
                .create(
                    &format!("{field}_1"),
                    vec![(field.to_string(), SortDirection::Asc)],
                    &store,
                )
                .unwrap();
        }
        manager
    }

    #[test]
    fn picks_index_for_top_level_equality() {
        let indexes = indexes_on(&["status"]);
        let expr = parse_filter(&doc! { "status": "active" }).unwrap();
        let plan = plan(&expr, &indexes).unwrap();
        assert_eq!(plan.index, "status_1");
    }

    #[test]
    fn picks_index_among_conjuncts() {
        let indexes = indexes_on(&["status"]);
        let expr = parse_filter(&doc! { "score": { "$gt": 1 }, "status": "active" }).unwrap();
        assert!(plan(&expr, &indexes).is_some());
    }

    #[test]
    fn operator_document_forces_full_scan() {
        let indexes = indexes_on(&["status"]);
        let expr = parse_filter(&doc! { "status": { "$eq": "active" } }).unwrap();
        assert!(plan(&expr, &indexes).is_none());
    }

    #[test]
    fn no_index_on_field_forces_full_scan() {
        let indexes = indexes_on(&["status"]);
        let expr = parse_filter(&doc! { "name": "x" }).unwrap();
        assert!(plan(&expr, &indexes).is_none());
    }

    #[test]
    fn equality_under_or_is_not_planned() {
        let indexes = indexes_on(&["status"]);
        let expr = parse_filter(&doc! { "$or": [{ "status": "active" }] }).unwrap();
        assert!(plan(&expr, &indexes).is_none());
    }

    #[test]
    fn first_registered_index_wins() {
        let indexes = indexes_on(&["a", "b"]);
        let expr = parse_filter(&doc! { "b": 1, "a": 2 }).unwrap();
        let plan = plan(&expr, &indexes).unwrap();
        assert_eq!(plan.index, "a_1");
    }

    #[test]
    fn compound_index_is_never_planned() {
        let store = MemoryStore::new();
        let mut manager = IndexManager::new();
        manager
            .create(
                "a_1_b_1",
                vec![
                    ("a".to_string(), SortDirection::Asc),
                    ("b".to_string(), SortDirection::Asc),
                ],
                &store,
            )
            .unwrap();
        let expr = parse_filter(&doc! { "a": 1, "b": 2 }).unwrap();
        assert!(plan(&expr, &manager).is_none());
    }
}

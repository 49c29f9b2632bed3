mod common;
use common::*;

use bson::{Bson, doc};

#[test]
fn distinct_over_scalar_field() {
    let col = seeded_accounts();
    let mut values = col.distinct("status", None).unwrap();
    values.sort_by_key(|v| v.as_str().unwrap_or_default().to_string());
    assert_eq!(
        values,
        vec![
            Bson::String("active".into()),
            Bson::String("rejected".into()),
            Bson::String("snoozed".into()),
        ]
    );
}

#[test]
fn distinct_with_filter() {
    let col = seeded_accounts();
    let values = col
        .distinct("status", Some(&doc! { "active": true }))
        .unwrap();
    assert_eq!(values.len(), 2); // active, snoozed
}

#[test]
fn distinct_expands_array_fields() {
    let mut col = empty_collection("posts");
    col.insert_many(vec![
        doc! { "tags": ["rust", "db"] },
        doc! { "tags": ["db", "embedded"] },
        doc! { "title": "untagged" },
    ])
    .unwrap();

    let mut values: Vec<String> = col
        .distinct("tags", None)
        .unwrap()
        .into_iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    values.sort();
    assert_eq!(values, vec!["db", "embedded", "rust"]);
}

#[test]
fn distinct_unifies_numeric_widths() {
    let mut col = empty_collection("nums");
    col.insert_many(vec![
        doc! { "n": 1_i32 },
        doc! { "n": 1_i64 },
        doc! { "n": 1.0 },
        doc! { "n": 2 },
    ])
    .unwrap();

    assert_eq!(col.distinct("n", None).unwrap().len(), 2);
}

#[test]
fn distinct_on_missing_field_is_empty() {
    let col = seeded_accounts();
    assert!(col.distinct("nope", None).unwrap().is_empty());
}

mod common;
use common::*;

use bson::doc;

#[test]
fn delete_one_removes_first_match() {
    let mut col = seeded_accounts();
    let result = col.delete_one(&doc! { "status": "active" }).unwrap();
    assert_eq!(result.deleted_count, 1);
    assert_eq!(col.count(), 4);
    assert!(col.find_one(&doc! { "_id": "acct-1" }).unwrap().is_none());
}

#[test]
fn delete_many_removes_every_match() {
    let mut col = seeded_accounts();
    let result = col.delete_many(&doc! { "status": "active" }).unwrap();
    assert_eq!(result.deleted_count, 3);
    assert_eq!(col.count(), 2);
    assert_eq!(col.count_documents(&doc! { "status": "active" }).unwrap(), 0);
}

#[test]
fn remove_just_one_flag() {
    let mut col = seeded_accounts();
    assert_eq!(
        col.remove(&doc! { "status": "active" }, true).unwrap().deleted_count,
        1
    );
    assert_eq!(
        col.remove(&doc! { "status": "active" }, false).unwrap().deleted_count,
        2
    );
}

#[test]
fn delete_zero_matches_is_not_an_error() {
    let mut col = seeded_accounts();
    let result = col.delete_many(&doc! { "status": "no-such" }).unwrap();
    assert_eq!(result.deleted_count, 0);
    assert_eq!(col.count(), 5);
}

#[test]
fn delete_keeps_indexes_in_step() {
    let mut col = seeded_accounts();
    col.create_index(&doc! { "status": 1 }, Default::default()).unwrap();

    col.delete_many(&doc! { "status": "active" }).unwrap();
    // the indexed lookup must see the deletions
    assert!(col.find(&doc! { "status": "active" }).unwrap().to_vec().is_empty());
    assert_eq!(col.find(&doc! { "status": "snoozed" }).unwrap().to_vec().len(), 1);
}

#[test]
fn drop_empties_collection() {
    let mut col = seeded_accounts();
    col.create_index(&doc! { "status": 1 }, Default::default()).unwrap();
    col.drop();
    assert_eq!(col.count(), 0);
    assert!(col.find(&doc! { "status": "active" }).unwrap().to_vec().is_empty());
}

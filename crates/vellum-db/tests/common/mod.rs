use bson::doc;
use vellum_db::{Collection, MemoryStore};

pub const COLLECTION: &str = "accounts";

pub fn empty_collection(name: &str) -> Collection<MemoryStore> {
    Collection::new(name, MemoryStore::new())
}

/// A collection seeded with 5 account records.
pub fn seeded_accounts() -> Collection<MemoryStore> {
    let mut col = empty_collection(COLLECTION);
    col.insert_many(vec![
        doc! { "_id": "acct-1", "name": "Acme Corp", "revenue": 50000.0, "status": "active", "active": true },
        doc! { "_id": "acct-2", "name": "Globex", "revenue": 80000.0, "status": "snoozed", "active": true },
        doc! { "_id": "acct-3", "name": "Initech", "revenue": 12000.0, "status": "rejected", "active": false },
        doc! { "_id": "acct-4", "name": "Umbrella", "revenue": 95000.0, "status": "active", "active": true },
        doc! { "_id": "acct-5", "name": "Stark Industries", "revenue": 200000.0, "status": "active", "active": false },
    ])
    .unwrap();
    col
}

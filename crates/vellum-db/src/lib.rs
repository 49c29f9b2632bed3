mod aggregate;
mod collection;
mod cursor;
mod database;
mod error;
mod index;
pub mod matcher;
mod planner;
mod result;
mod update;

pub use bson::{Bson, Document, doc, oid::ObjectId};
pub use collection::{Collection, IndexOptions};
pub use cursor::{Cursor, SortedCursor};
pub use database::Database;
pub use error::DbError;
pub use matcher::{GeoPredicate, MatchContext, TextSearch};
pub use result::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
pub use vellum_query::{FindOptions, UpdateOptions};
pub use vellum_store::{MemoryStore, Store};

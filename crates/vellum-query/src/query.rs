use bson::Document;
use serde::{Deserialize, Serialize};

/// Options accepted by `find`-family calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// Options accepted by `update`-family calls.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Apply the update to every match instead of the first.
    pub multi: bool,
    /// Insert a synthesized document when nothing matches.
    pub upsert: bool,
}

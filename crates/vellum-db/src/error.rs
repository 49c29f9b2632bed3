use std::fmt;

use vellum_query::QueryError;

/// Engine error. Each variant carries the MongoDB error code for the
/// same condition, readable via [`DbError::code`].
#[derive(Debug, Clone, PartialEq)]
pub enum DbError {
    BadValue(String),
    TypeMismatch(String),
    IndexKeySpecsConflict(String),
    DuplicateKey(String),
    NotImplemented(String),
}

impl DbError {
    pub fn code(&self) -> i32 {
        match self {
            DbError::BadValue(_) => 2,
            DbError::TypeMismatch(_) => 14,
            DbError::IndexKeySpecsConflict(_) => 86,
            DbError::DuplicateKey(_) => 11000,
            DbError::NotImplemented(_) => 238,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::BadValue(msg) => write!(f, "bad value: {msg}"),
            DbError::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            DbError::IndexKeySpecsConflict(msg) => {
                write!(f, "index key specs conflict: {msg}")
            }
            DbError::DuplicateKey(msg) => write!(f, "duplicate key: {msg}"),
            DbError::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<QueryError> for DbError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::BadValue(msg) => DbError::BadValue(msg),
            QueryError::TypeMismatch(msg) => DbError::TypeMismatch(msg),
            QueryError::NotImplemented(msg) => DbError::NotImplemented(msg),
        }
    }
}

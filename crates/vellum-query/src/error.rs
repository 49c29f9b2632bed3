use std::fmt;

/// Canonicalization error for query, projection, sort, and update documents.
///
/// Each variant carries the MongoDB error code for the same condition, so
/// callers speaking that protocol can surface compatible diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    BadValue(String),
    TypeMismatch(String),
    NotImplemented(String),
}

impl QueryError {
    pub fn code(&self) -> i32 {
        match self {
            QueryError::BadValue(_) => 2,
            QueryError::TypeMismatch(_) => 14,
            QueryError::NotImplemented(_) => 238,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::BadValue(msg) => write!(f, "bad value: {msg}"),
            QueryError::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            QueryError::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {}

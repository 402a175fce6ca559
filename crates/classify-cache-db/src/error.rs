//! Error types for the cache metadata store

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// A record with this hash already exists
    Conflict(String),
    /// No record with this hash exists
    NotFound(String),
    /// A stored row could not be turned into a record
    Decode(String),
    Database(Box<sqlx::Error>),
    Migrate(Box<sqlx::migrate::MigrateError>),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict(hash) => write!(f, "Cache record already exists: {}", hash),
            StoreError::NotFound(hash) => write!(f, "Cache record not found: {}", hash),
            StoreError::Decode(msg) => write!(f, "Corrupt cache record: {}", msg),
            StoreError::Database(err) => write!(f, "Database error: {}", err),
            StoreError::Migrate(err) => write!(f, "Migration error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(err) => Some(err.as_ref()),
            StoreError::Migrate(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(Box::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migrate(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

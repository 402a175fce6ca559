//! Error types for the content cache

use classify_cache_db::StoreError;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CacheError {
    /// Unique-hash violation on insert
    Conflict(String),
    /// Update or attach against a hash with no record
    NotFound(String),
    /// Blob read/write/delete failure on the storage medium
    Storage {
        path: PathBuf,
        source: Box<std::io::Error>,
    },
    Database(Box<StoreError>),
    Config(String),
}

impl CacheError {
    pub fn storage(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        CacheError::Storage {
            path: path.into(),
            source: Box::new(err),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Conflict(hash) => write!(f, "Conflict: {} is already cached", hash),
            CacheError::NotFound(hash) => write!(f, "Not found: no cache record for {}", hash),
            CacheError::Storage { path, source } => {
                write!(f, "Storage error at {}: {}", path.display(), source)
            }
            CacheError::Database(err) => write!(f, "Database error: {}", err),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Storage { source, .. } => Some(source.as_ref()),
            CacheError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(hash) => CacheError::Conflict(hash),
            StoreError::NotFound(hash) => CacheError::NotFound(hash),
            other => CacheError::Database(Box::new(other)),
        }
    }
}

impl From<tracing_subscriber::filter::ParseError> for CacheError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        CacheError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

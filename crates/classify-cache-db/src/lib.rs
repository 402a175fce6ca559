//! Metadata layer for the content-addressed classification cache
//!
//! One row per distinct content hash, holding the blob location, lifecycle
//! timestamps, and the serialized classification result.

pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::MetadataStore;
pub use types::{CacheRecord, CacheStats, NewCacheRecord, RecordState};

//! Content-addressed cache for an expensive classification step
//!
//! Submitted blobs are keyed by the SHA-256 of their bytes. Each distinct
//! blob is written to disk once and tracked in the metadata store; repeat
//! submissions get the stored result back instead of being recomputed.
//! Entries expire on a sliding window, are soft-deleted by sweeps, and are
//! resurrected when the same content shows up again.

pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod telemetry;
pub mod types;

pub use cache::ContentCache;
pub use classify_cache_db::{CacheRecord, CacheStats, MetadataStore, RecordState};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use pipeline::{classify_batch, Classifier, ItemOutcome, ResultSource};
pub use types::{BlobInput, CacheSummary, Resolution, ResolvedItem, SweepReport};

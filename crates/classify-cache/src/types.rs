//! Core types for the content cache

use classify_cache_db::CacheStats;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One submitted blob, as extracted by the request layer
#[derive(Debug, Clone)]
pub struct BlobInput {
    /// Original name supplied by the client (e.g. upload file name)
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BlobInput {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// How an item was classified against the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// First sighting: blob written, record inserted
    Novel,
    /// Soft-deleted record brought back: blob rewritten, result reset
    Resurrected,
    /// Active record: no blob write, expiry renewed
    Hit,
}

/// Per-item answer from a batch resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub name: String,
    /// Where the blob lives on disk
    pub path: PathBuf,
    /// Stored result, or `None` if the item needs computation
    pub existing_result: Option<String>,
    pub hash: String,
    pub resolution: Resolution,
}

impl ResolvedItem {
    pub fn needs_computation(&self) -> bool {
        self.existing_result.is_none()
    }
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records found past expiry and not yet soft-deleted
    pub expired: usize,
    pub blobs_removed: usize,
    /// Blobs that were already gone from disk
    pub blobs_missing: usize,
    /// Records soft-deleted by the bulk update
    pub marked: u64,
}

/// Cache-wide statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSummary {
    pub records: CacheStats,
    pub expiry_secs: u64,
}

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;

/// Lifecycle state of a cache record, derived from `deleted_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Blob is present on disk at `path`
    Active,
    /// Blob was reclaimed; metadata kept so the hash can be resurrected
    SoftDeleted,
}

/// Metadata for one distinct piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub hash: String,
    pub path: PathBuf,
    pub expiry_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Serialized classification result. `None` while the computation is pending.
    pub result: Option<String>,
}

impl CacheRecord {
    pub fn state(&self) -> RecordState {
        if self.deleted_at.is_some() {
            RecordState::SoftDeleted
        } else {
            RecordState::Active
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time < now
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// Parameters for inserting a record for novel content
#[derive(Debug, Clone)]
pub struct NewCacheRecord {
    pub hash: String,
    pub expiry_time: DateTime<Utc>,
    pub path: PathBuf,
    pub result: Option<String>,
}

/// Record counts by lifecycle state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CacheStats {
    pub active: i64,
    pub soft_deleted: i64,
    /// Active records still waiting for a result
    pub pending: i64,
}

/// Row as stored in `cache_entries`; timestamps are unix milliseconds
#[derive(Debug, Clone, FromRow)]
pub(crate) struct CacheRow {
    pub hash: String,
    pub path: String,
    pub expiry_time: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub result: Option<String>,
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Decode(format!("timestamp out of range: {}", ms)))
}

impl TryFrom<CacheRow> for CacheRecord {
    type Error = StoreError;

    fn try_from(row: CacheRow) -> Result<Self> {
        Ok(Self {
            expiry_time: from_millis(row.expiry_time)?,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            deleted_at: row.deleted_at.map(from_millis).transpose()?,
            hash: row.hash,
            path: PathBuf::from(row.path),
            result: row.result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(deleted_at: Option<DateTime<Utc>>) -> CacheRecord {
        let now = from_millis(to_millis(Utc::now())).unwrap();
        CacheRecord {
            hash: "abc123".to_string(),
            path: PathBuf::from("/cache/abc123.cat.jpg"),
            expiry_time: now + Duration::seconds(60),
            created_at: now,
            updated_at: now,
            deleted_at,
            result: None,
        }
    }

    #[test]
    fn test_state_follows_deleted_at() {
        assert_eq!(record(None).state(), RecordState::Active);
        assert_eq!(record(Some(Utc::now())).state(), RecordState::SoftDeleted);
    }

    #[test]
    fn test_expiry_check() {
        let rec = record(None);
        assert!(!rec.is_expired_at(rec.created_at));
        assert!(rec.is_expired_at(rec.expiry_time + Duration::milliseconds(1)));
    }

    #[test]
    fn test_millis_conversion_keeps_precision() {
        let t = from_millis(1_717_200_000_123).unwrap();
        assert_eq!(to_millis(t), 1_717_200_000_123);
    }

    #[test]
    fn test_row_into_record() {
        let row = CacheRow {
            hash: "abc123".to_string(),
            path: "/cache/abc123.cat.jpg".to_string(),
            expiry_time: 2_000,
            created_at: 1_000,
            updated_at: 1_500,
            deleted_at: None,
            result: Some("{}".to_string()),
        };
        let rec = CacheRecord::try_from(row).unwrap();
        assert_eq!(rec.path, PathBuf::from("/cache/abc123.cat.jpg"));
        assert_eq!(to_millis(rec.updated_at), 1_500);
        assert_eq!(rec.state(), RecordState::Active);
        assert!(!rec.is_pending());
    }

    #[test]
    fn test_out_of_range_timestamp_is_decode_error() {
        let row = CacheRow {
            hash: "abc123".to_string(),
            path: "/cache/abc123.cat.jpg".to_string(),
            expiry_time: i64::MAX,
            created_at: 1_000,
            updated_at: 1_000,
            deleted_at: None,
            result: None,
        };
        let err = CacheRecord::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_record_serialization() {
        let rec = record(None);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("abc123"));

        let deserialized: CacheRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, rec);
    }
}

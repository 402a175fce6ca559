//! Content-addressed blob cache backed by the metadata store

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::types::{BlobInput, CacheSummary, Resolution, ResolvedItem, SweepReport};
use chrono::{DateTime, Duration, Utc};
use classify_cache_db::{CacheRecord, MetadataStore, NewCacheRecord, RecordState, StoreError};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Expiry windows are capped at roughly 100 years.
const MAX_EXPIRY_SECS: u64 = 100 * 365 * 24 * 60 * 60;

const MAX_NAME_LEN: usize = 128;

/// A content-addressed cache: blobs on disk, lifecycle in the metadata store
pub struct ContentCache {
    store: MetadataStore,
    /// Directory where blobs are stored
    cache_dir: PathBuf,
    /// Sliding expiry window in seconds
    expiry_secs: AtomicU64,
    /// Shared by resolve/attach, exclusive for sweeps and bulk changes
    sweep_lock: RwLock<()>,
}

impl ContentCache {
    pub fn new(store: MetadataStore, cache_dir: PathBuf, expiry_secs: u64) -> Self {
        Self {
            store,
            cache_dir,
            expiry_secs: AtomicU64::new(expiry_secs),
            sweep_lock: RwLock::new(()),
        }
    }

    /// Open the store, run migrations and create the blob directory
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let store = MetadataStore::open(&config.db_path).await?;
        let cache = Self::new(store, config.cache_dir.clone(), config.expiry_secs);
        cache.init().await?;
        Ok(cache)
    }

    /// Ensure the blob directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CacheError::storage(&self.cache_dir, e))?;
        info!(
            cache_dir = ?self.cache_dir,
            expiry_secs = self.expiry_secs(),
            "Cache initialized"
        );
        Ok(())
    }

    /// Hex SHA-256 of the raw bytes
    pub fn content_hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn expiry_secs(&self) -> u64 {
        self.expiry_secs.load(Ordering::Relaxed)
    }

    /// Deterministic blob location for content: `{cache_dir}/{hash}.{name}`
    pub fn blob_path(&self, hash: &str, name: &str) -> PathBuf {
        let name = sanitize_name(name);
        if name.is_empty() {
            self.cache_dir.join(hash)
        } else {
            self.cache_dir.join(format!("{}.{}", hash, name))
        }
    }

    fn expires_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        expiry_after(from, self.expiry_secs())
    }

    /// Classify and stage a single blob
    pub async fn resolve(&self, input: BlobInput) -> Result<ResolvedItem> {
        let _guard = self.sweep_lock.read().await;
        self.resolve_locked(input).await
    }

    /// Classify and stage a batch, in input order.
    ///
    /// One entry per input; a failed item does not stop its siblings.
    pub async fn resolve_batch(&self, items: Vec<BlobInput>) -> Vec<Result<ResolvedItem>> {
        let _guard = self.sweep_lock.read().await;
        let mut resolved = Vec::with_capacity(items.len());
        for input in items {
            let name = input.name.clone();
            let item = self.resolve_locked(input).await;
            if let Err(e) = &item {
                warn!(name = %name, error = %e, "Failed to resolve cache item");
            }
            resolved.push(item);
        }
        resolved
    }

    async fn resolve_locked(&self, input: BlobInput) -> Result<ResolvedItem> {
        let BlobInput { name, bytes } = input;
        let hash = Self::content_hash(&bytes);
        let now = Utc::now();

        match self.store.select(&hash).await? {
            None => self.stage_novel(name, bytes, hash, now).await,
            Some(record) if record.state() == RecordState::SoftDeleted => {
                self.resurrect(name, bytes, record, now).await
            }
            Some(record) => self.renew_hit(name, &bytes, record, now).await,
        }
    }

    async fn stage_novel(
        &self,
        name: String,
        bytes: Vec<u8>,
        hash: String,
        now: DateTime<Utc>,
    ) -> Result<ResolvedItem> {
        let path = self.blob_path(&hash, &name);
        write_blob(&path, &bytes).await?;

        let record = NewCacheRecord {
            hash: hash.clone(),
            expiry_time: self.expires_from(now),
            path: path.clone(),
            result: None,
        };

        match self.store.insert(&record).await {
            Ok(()) => {
                debug!(hash = %hash, name = %name, "Cached new content");
                Ok(ResolvedItem {
                    name,
                    path,
                    existing_result: None,
                    hash,
                    resolution: Resolution::Novel,
                })
            }
            Err(StoreError::Conflict(_)) => {
                debug!(hash = %hash, "Content cached concurrently, resolving as lookup");
                let existing = self
                    .store
                    .select(&hash)
                    .await?
                    .ok_or_else(|| CacheError::NotFound(hash.clone()))?;
                if existing.path != path {
                    if let Err(e) = remove_blob(&path).await {
                        warn!(hash = %hash, error = %e, "Failed to remove orphaned blob");
                    }
                }
                match existing.state() {
                    RecordState::Active => self.renew_hit(name, &bytes, existing, now).await,
                    RecordState::SoftDeleted => self.resurrect(name, bytes, existing, now).await,
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resurrect(
        &self,
        name: String,
        bytes: Vec<u8>,
        record: CacheRecord,
        now: DateTime<Utc>,
    ) -> Result<ResolvedItem> {
        let path = if record.path.as_os_str().is_empty() {
            self.blob_path(&record.hash, &name)
        } else {
            record.path.clone()
        };
        write_blob(&path, &bytes).await?;

        let record = CacheRecord {
            path: path.clone(),
            expiry_time: self.expires_from(now),
            updated_at: now,
            deleted_at: None,
            result: None,
            ..record
        };
        self.store.update(&record).await?;

        debug!(hash = %record.hash, name = %name, "Resurrected soft-deleted content");
        Ok(ResolvedItem {
            name,
            path,
            existing_result: None,
            hash: record.hash,
            resolution: Resolution::Resurrected,
        })
    }

    async fn renew_hit(
        &self,
        name: String,
        bytes: &[u8],
        record: CacheRecord,
        now: DateTime<Utc>,
    ) -> Result<ResolvedItem> {
        if fs::metadata(&record.path).await.is_err() {
            warn!(
                hash = %record.hash,
                path = ?record.path,
                "Cached blob missing on disk, rewriting"
            );
            write_blob(&record.path, bytes).await?;
        }

        self.store
            .renew(&record.hash, self.expires_from(now), now)
            .await?;

        debug!(hash = %record.hash, pending = record.is_pending(), "Cache hit");
        Ok(ResolvedItem {
            name,
            path: record.path,
            existing_result: record.result,
            hash: record.hash,
            resolution: Resolution::Hit,
        })
    }

    /// Store a computed result and renew the entry's expiry
    pub async fn attach_result(&self, hash: &str, result: impl Into<String>) -> Result<()> {
        let _guard = self.sweep_lock.read().await;
        let now = Utc::now();
        self.store
            .set_result(hash, &result.into(), self.expires_from(now), now)
            .await?;
        debug!(hash = %hash, "Attached result");
        Ok(())
    }

    /// Remove blobs of newly expired entries and soft-delete their records
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let _guard = self.sweep_lock.write().await;
        self.sweep_locked().await
    }

    async fn sweep_locked(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let expired = self.store.select_all_newly_expired_at(now).await?;
        if expired.is_empty() {
            debug!("No expired cache entries");
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport {
            expired: expired.len(),
            ..Default::default()
        };
        let mut first_error = None;
        for record in &expired {
            match remove_blob(&record.path).await {
                Ok(true) => report.blobs_removed += 1,
                Ok(false) => report.blobs_missing += 1,
                Err(e) => {
                    warn!(hash = %record.hash, error = %e, "Failed to remove expired blob");
                    first_error.get_or_insert(e);
                }
            }
        }

        // Records whose blob could not be removed are still marked; a
        // resubmission rewrites the blob in place.
        report.marked = self.store.delete_all_expired_at(now).await?;
        info!(
            expired = report.expired,
            removed = report.blobs_removed,
            missing = report.blobs_missing,
            marked = report.marked,
            "Swept expired cache entries"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Change the expiry window, re-anchor active entries to it, then sweep.
    ///
    /// The new window only takes effect once every active entry has been
    /// re-anchored; on error the previous window stays in place.
    pub async fn reconfigure_expiry(&self, expiry_secs: u64) -> Result<SweepReport> {
        let _guard = self.sweep_lock.write().await;

        let active = self.store.select_all_not_expired().await?;
        let renewed = active.len();
        for record in active {
            let record = CacheRecord {
                expiry_time: expiry_after(record.updated_at, expiry_secs),
                ..record
            };
            self.store.update(&record).await?;
        }
        self.expiry_secs.store(expiry_secs, Ordering::Relaxed);
        info!(expiry_secs, renewed, "Reconfigured cache expiry");

        self.sweep_locked().await
    }

    /// Remove every active blob and soft-delete every record
    pub async fn purge_all(&self) -> Result<u64> {
        let _guard = self.sweep_lock.write().await;
        let records = self.store.select_all().await?;

        let mut first_error = None;
        for record in records
            .iter()
            .filter(|r| r.state() == RecordState::Active)
        {
            if let Err(e) = remove_blob(&record.path).await {
                warn!(hash = %record.hash, error = %e, "Failed to remove blob during purge");
                first_error.get_or_insert(e);
            }
        }

        let marked = self.store.delete_all().await?;
        info!(marked, "Purged cache");

        match first_error {
            Some(e) => Err(e),
            None => Ok(marked),
        }
    }

    pub async fn stats(&self) -> Result<CacheSummary> {
        Ok(CacheSummary {
            records: self.store.stats().await?,
            expiry_secs: self.expiry_secs(),
        })
    }
}

fn expiry_after(from: DateTime<Utc>, expiry_secs: u64) -> DateTime<Utc> {
    from + Duration::seconds(expiry_secs.min(MAX_EXPIRY_SECS) as i64)
}

/// Reduce a client-supplied name to a safe single path component
fn sanitize_name(name: &str) -> String {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned
        .trim_start_matches('.')
        .chars()
        .take(MAX_NAME_LEN)
        .collect()
}

async fn write_blob(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::storage(parent, e))?;
    }
    fs::write(path, bytes)
        .await
        .map_err(|e| CacheError::storage(path, e))
}

/// Returns `false` if the blob was already gone
async fn remove_blob(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = ?path, "Blob already removed");
            Ok(false)
        }
        Err(e) => Err(CacheError::storage(path, e)),
    }
}

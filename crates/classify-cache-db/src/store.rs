//! SQLite-backed metadata store for cached content
//!
//! Every statement runs on a single pooled connection, so mutations are
//! serialized and committed before the call returns.

use crate::error::{Result, StoreError};
use crate::types::{to_millis, CacheRecord, CacheRow, CacheStats, NewCacheRecord};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Sqlite;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SELECT_RECORD: &str = r#"
    SELECT hash, path, expiry_time, created_at, updated_at, deleted_at, result
    FROM cache_entries
"#;

/// Persistent hash → record store
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if missing) the database file at `path` and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(db_path = ?path, "Opening cache metadata store");
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));
        Self::connect(options).await
    }

    /// Connect with explicit options and run migrations
    pub async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run all schema migrations (tracked in `_sqlx_migrations`)
    pub async fn migrate(&self) -> Result<()> {
        info!("Running cache metadata migrations...");
        sqlx::migrate!().run(&self.pool).await?;
        info!("Cache metadata migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert a record for novel content. Fails with `Conflict` if the hash exists,
    /// including as a soft-deleted record.
    pub async fn insert(&self, record: &NewCacheRecord) -> Result<()> {
        debug!(hash = %record.hash, "Inserting cache record");
        let now = to_millis(Utc::now());
        let inserted = sqlx::query(
            r#"
            INSERT INTO cache_entries (hash, expiry_time, path, created_at, updated_at, result)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.hash)
        .bind(to_millis(record.expiry_time))
        .bind(record.path.to_string_lossy().into_owned())
        .bind(now)
        .bind(now)
        .bind(record.result.as_deref())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Conflict(record.hash.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite every mutable field of an existing record
    pub async fn update(&self, record: &CacheRecord) -> Result<()> {
        debug!(hash = %record.hash, "Updating cache record");
        let updated = sqlx::query(
            r#"
            UPDATE cache_entries
            SET expiry_time = ?, path = ?, created_at = ?, updated_at = ?, deleted_at = ?, result = ?
            WHERE hash = ?
            "#,
        )
        .bind(to_millis(record.expiry_time))
        .bind(record.path.to_string_lossy().into_owned())
        .bind(to_millis(record.created_at))
        .bind(to_millis(record.updated_at))
        .bind(record.deleted_at.map(to_millis))
        .bind(record.result.as_deref())
        .bind(&record.hash)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.hash.clone()));
        }
        Ok(())
    }

    /// Push an active record's expiry forward. Leaves its result untouched.
    pub async fn renew(
        &self,
        hash: &str,
        expiry_time: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let renewed = sqlx::query(
            r#"
            UPDATE cache_entries
            SET expiry_time = ?, updated_at = ?
            WHERE hash = ? AND deleted_at IS NULL
            "#,
        )
        .bind(to_millis(expiry_time))
        .bind(to_millis(updated_at))
        .bind(hash)
        .execute(&self.pool)
        .await?;

        if renewed.rows_affected() == 0 {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        Ok(())
    }

    /// Store a computed result and push the record's expiry forward
    pub async fn set_result(
        &self,
        hash: &str,
        result: &str,
        expiry_time: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE cache_entries
            SET result = ?, expiry_time = ?, updated_at = ?
            WHERE hash = ?
            "#,
        )
        .bind(result)
        .bind(to_millis(expiry_time))
        .bind(to_millis(updated_at))
        .bind(hash)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        Ok(())
    }

    pub async fn select(&self, hash: &str) -> Result<Option<CacheRecord>> {
        let sql = format!("{SELECT_RECORD} WHERE hash = ?");
        let row = sqlx::query_as::<_, CacheRow>(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CacheRecord::try_from).transpose()
    }

    /// Every record, oldest first
    pub async fn select_all(&self) -> Result<Vec<CacheRecord>> {
        let sql = format!("{SELECT_RECORD} ORDER BY created_at, id");
        self.fetch_records(&sql, None).await
    }

    /// Records past their expiry, soft-deleted or not
    pub async fn select_all_expired(&self) -> Result<Vec<CacheRecord>> {
        self.select_all_expired_at(Utc::now()).await
    }

    pub async fn select_all_expired_at(&self, now: DateTime<Utc>) -> Result<Vec<CacheRecord>> {
        let sql = format!("{SELECT_RECORD} WHERE expiry_time < ?");
        self.fetch_records(&sql, Some(now)).await
    }

    /// Expired records that have not been soft-deleted yet
    pub async fn select_all_newly_expired(&self) -> Result<Vec<CacheRecord>> {
        self.select_all_newly_expired_at(Utc::now()).await
    }

    pub async fn select_all_newly_expired_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheRecord>> {
        let sql = format!("{SELECT_RECORD} WHERE expiry_time < ? AND deleted_at IS NULL");
        self.fetch_records(&sql, Some(now)).await
    }

    /// Records that are neither expired nor soft-deleted
    pub async fn select_all_not_expired(&self) -> Result<Vec<CacheRecord>> {
        self.select_all_not_expired_at(Utc::now()).await
    }

    pub async fn select_all_not_expired_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheRecord>> {
        let sql = format!("{SELECT_RECORD} WHERE expiry_time >= ? AND deleted_at IS NULL");
        self.fetch_records(&sql, Some(now)).await
    }

    /// Soft-delete every newly expired record. Returns the number of records marked.
    pub async fn delete_all_expired(&self) -> Result<u64> {
        self.delete_all_expired_at(Utc::now()).await
    }

    pub async fn delete_all_expired_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let now = to_millis(now);
        let marked = sqlx::query(
            r#"
            UPDATE cache_entries
            SET deleted_at = ?
            WHERE expiry_time < ? AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(marked.rows_affected())
    }

    /// Soft-delete every record regardless of expiry. Existing deletion times are kept.
    pub async fn delete_all(&self) -> Result<u64> {
        let marked =
            sqlx::query("UPDATE cache_entries SET deleted_at = ? WHERE deleted_at IS NULL")
                .bind(to_millis(Utc::now()))
                .execute(&self.pool)
                .await?;
        Ok(marked.rows_affected())
    }

    /// Soft-delete a single record
    pub async fn soft_delete(&self, hash: &str) -> Result<()> {
        let marked = sqlx::query(
            "UPDATE cache_entries SET deleted_at = COALESCE(deleted_at, ?) WHERE hash = ?",
        )
        .bind(to_millis(Utc::now()))
        .bind(hash)
        .execute(&self.pool)
        .await?;

        if marked.rows_affected() == 0 {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let stats = sqlx::query_as::<_, CacheStats>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS soft_deleted,
                COALESCE(SUM(CASE WHEN deleted_at IS NULL AND result IS NULL THEN 1 ELSE 0 END), 0) AS pending
            FROM cache_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn fetch_records(
        &self,
        sql: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheRecord>> {
        let mut query = sqlx::query_as::<Sqlite, CacheRow>(sql);
        if let Some(now) = now {
            query = query.bind(to_millis(now));
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(CacheRecord::try_from).collect()
    }
}

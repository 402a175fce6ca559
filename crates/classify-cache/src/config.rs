use std::env;
use std::path::PathBuf;

pub const DEFAULT_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Cache configuration parsed from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// SQLite file holding cache metadata
    pub db_path: PathBuf,
    /// Directory where content blobs are stored
    pub cache_dir: PathBuf,
    /// Sliding expiry window in seconds
    pub expiry_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./cache.db"),
            cache_dir: PathBuf::from("./cache"),
            expiry_secs: DEFAULT_EXPIRY_SECS, // 7 days
        }
    }
}

impl CacheConfig {
    /// Parse configuration from `CACHE_DB_PATH`, `CACHE_DIR` and `CACHE_EXPIRY_SECS`
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let db_path = var("CACHE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let cache_dir = var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let expiry_secs = var("CACHE_EXPIRY_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(defaults.expiry_secs);

        Self {
            db_path,
            cache_dir,
            expiry_secs,
        }
    }
}

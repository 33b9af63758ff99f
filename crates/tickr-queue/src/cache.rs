use std::sync::Arc;

use async_trait::async_trait;
use tickr_core::config::{CacheBackend, TickrConfig};
use tracing::info;

use crate::error::Result;
use crate::redis_cache::RedisCache;
use crate::sqlite_cache::SqliteCache;

/// The shared key/value + list store that queue, task records and job status
/// keys live in. Implementations must make `pop_front` exclusive: a given
/// list entry is returned to at most one caller.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Stable identifier for logs (e.g. `"sqlite"`).
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Write `key = value` and append `item` to the tail of `list` as one
    /// atomic step, so a reader never sees the list entry without the record.
    async fn set_and_push(&self, key: &str, value: &str, list: &str, item: &str) -> Result<()>;

    /// Remove and return the oldest entry of `list`.
    async fn pop_front(&self, list: &str) -> Result<Option<String>>;

    /// All entries of `list`, oldest first, without removing them.
    async fn list(&self, list: &str) -> Result<Vec<String>>;
}

/// Open the cache backend selected in config.
pub async fn open(config: &TickrConfig) -> Result<Arc<dyn SharedCache>> {
    let cache: Arc<dyn SharedCache> = match config.cache.backend {
        CacheBackend::Sqlite => Arc::new(SqliteCache::open(&config.cache.sqlite_path)?),
        CacheBackend::Redis => Arc::new(RedisCache::connect(&config.cache.redis_url).await?),
    };
    info!(backend = cache.name(), "shared cache ready");
    Ok(cache)
}

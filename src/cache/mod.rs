//! Tagged result cache.
//!
//! [`TaggedCache`] layers tags, default TTLs and hit statistics over a
//! pluggable [`CacheStore`]. Query results are tagged `table:<name>` for every
//! table they read, and writes flush those tags.

pub mod file;
pub mod memory;
pub mod store;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::debug;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{CacheEntry, CacheStore};

use crate::config::CacheConfig;
use crate::error::DbResult;
use crate::models::Params;

/// Tag carried by every cached result that reads `table`.
pub fn table_tag(table: &str) -> String {
    format!("table:{table}")
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

pub struct TaggedCache {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    default_ttl: Duration,
    namespace: String,
    /// Tags for the next `put` only
    pending_tags: Mutex<Vec<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl TaggedCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            default_ttl: config.default_ttl(),
            namespace: config.namespace.clone(),
            pending_tags: Mutex::new(Vec::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Key of a compiled query: namespace, group and a digest of the SQL and
    /// its bound values.
    pub fn query_key(&self, group: &str, sql: &str, params: &Params) -> DbResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(sql.as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::to_vec(params)?);
        Ok(format!("{}:{}:{:x}", self.namespace, group, hasher.finalize()))
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<JsonValue>> {
        if !self.enabled {
            return Ok(None);
        }
        match self.store.get(key).await? {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store `value`. `None` uses the default TTL; a zero TTL never expires.
    ///
    /// Tags set through [`TaggedCache::tags`] are attached and then cleared.
    pub async fn put(&self, key: &str, value: JsonValue, ttl: Option<Duration>) -> DbResult<()> {
        let tags = std::mem::take(&mut *self.pending_tags.lock());
        self.put_tagged(key, value, ttl, tags).await
    }

    pub async fn put_tagged(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) -> DbResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.store.put(CacheEntry::new(key, value, Some(ttl), tags)).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Set the tags of the next `put`.
    pub fn tags<I, S>(&self, tags: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.pending_tags.lock() = tags.into_iter().map(Into::into).collect();
        self
    }

    pub async fn forget(&self, key: &str) -> DbResult<bool> {
        self.store.forget(key).await
    }

    pub async fn flush(&self) -> DbResult<()> {
        debug!(store = self.store.name(), "Flushing cache");
        self.store.flush().await
    }

    pub async fn flush_tag(&self, tag: &str) -> DbResult<usize> {
        self.flush_tags(&[tag.to_string()]).await
    }

    pub async fn flush_tags(&self, tags: &[String]) -> DbResult<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let removed = self.store.flush_tags(tags).await?;
        debug!(store = self.store.name(), tags = ?tags, removed, "Flushed cache tags");
        Ok(removed)
    }

    /// Invalidate every cached result that read `table`.
    pub async fn flush_table(&self, table: &str) -> DbResult<usize> {
        self.flush_tag(&table_tag(table)).await
    }

    pub async fn flush_tables(&self, tables: &[&str]) -> DbResult<usize> {
        let tags: Vec<String> = tables.iter().map(|t| table_tag(t)).collect();
        self.flush_tags(&tags).await
    }

    /// Return the cached value for `key`, or compute, store and return it.
    pub async fn remember<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: Vec<String>,
        compute: F,
    ) -> DbResult<JsonValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<JsonValue>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        let value = compute().await?;
        self.put_tagged(key, value.clone(), ttl, tags).await?;
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for TaggedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedCache")
            .field("store", &self.store.name())
            .field("enabled", &self.enabled)
            .field("namespace", &self.namespace)
            .field("stats", &self.stats())
            .finish()
    }
}

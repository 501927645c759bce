//! Cache store contract.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DbResult;

/// A stored value with its expiry and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing)]
    pub key: String,
    /// Unix seconds; 0 never expires
    pub expires: u64,
    pub value: JsonValue,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: JsonValue, ttl: Option<Duration>, tags: Vec<String>) -> Self {
        let expires = match ttl {
            Some(ttl) if !ttl.is_zero() => now_secs().saturating_add(ttl.as_secs().max(1)),
            _ => 0,
        };
        Self {
            key: key.into(),
            expires,
            value,
            tags,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires != 0 && self.expires <= now_secs()
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Backing storage for [`super::TaggedCache`].
///
/// Stores check expiry lazily: `get` on an expired entry removes it and
/// returns `None`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<CacheEntry>>;

    async fn put(&self, entry: CacheEntry) -> DbResult<()>;

    /// Remove one key. Returns whether it existed.
    async fn forget(&self, key: &str) -> DbResult<bool>;

    /// Remove everything.
    async fn flush(&self) -> DbResult<()>;

    /// Remove every entry carrying any of `tags`. Returns the number removed.
    async fn flush_tags(&self, tags: &[String]) -> DbResult<usize>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

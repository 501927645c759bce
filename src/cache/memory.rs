//! In-process cache store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::store::{CacheEntry, CacheStore};
use crate::error::DbResult;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// tag -> keys carrying it
    tag_index: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }
}

/// Mutex-protected map with a tag reverse index.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently indexed under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .tag_index
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> DbResult<Option<CacheEntry>> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return Ok(None),
        };
        if expired {
            inner.remove(key);
            return Ok(None);
        }
        Ok(inner.entries.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> DbResult<()> {
        let mut inner = self.inner.lock();
        // Drop the old entry so stale tags leave the index
        inner.remove(&entry.key);
        for tag in &entry.tags {
            inner
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        inner.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn forget(&self, key: &str) -> DbResult<bool> {
        Ok(self.inner.lock().remove(key).is_some())
    }

    async fn flush(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.tag_index.clear();
        Ok(())
    }

    async fn flush_tags(&self, tags: &[String]) -> DbResult<usize> {
        let mut inner = self.inner.lock();
        let keys: HashSet<String> = tags
            .iter()
            .filter_map(|tag| inner.tag_index.get(tag))
            .flat_map(|keys| keys.iter().cloned())
            .collect();
        let mut removed = 0;
        for key in keys {
            if inner.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn entry(key: &str, tags: &[&str]) -> CacheEntry {
        CacheEntry::new(
            key,
            json!([1, 2]),
            None,
            tags.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_index_follows_put_and_forget() {
        let store = MemoryStore::new();
        store.put(entry("a", &["table:users"])).await.unwrap();
        store.put(entry("b", &["table:users", "table:posts"])).await.unwrap();
        assert_eq!(store.keys_for_tag("table:users"), vec!["a", "b"]);

        assert!(store.forget("b").await.unwrap());
        assert_eq!(store.keys_for_tag("table:users"), vec!["a"]);
        assert!(store.keys_for_tag("table:posts").is_empty());

        // re-put with different tags replaces index membership
        store.put(entry("a", &["table:posts"])).await.unwrap();
        assert!(store.keys_for_tag("table:users").is_empty());
        assert_eq!(store.keys_for_tag("table:posts"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_flush_tags_only_touches_tagged() {
        let store = MemoryStore::new();
        store.put(entry("u", &["table:users"])).await.unwrap();
        store.put(entry("p", &["table:posts"])).await.unwrap();
        store.put(entry("plain", &[])).await.unwrap();

        let removed = store.flush_tags(&["table:users".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("u").await.unwrap().is_none());
        assert!(store.get("p").await.unwrap().is_some());
        assert!(store.get("plain").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_read() {
        let store = MemoryStore::new();
        let mut e = entry("k", &["t"]);
        e.expires = 1;
        store.put(e).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
        assert!(store.keys_for_tag("t").is_empty());

        let live = CacheEntry::new("live", json!(1), Some(Duration::from_secs(60)), vec![]);
        store.put(live).await.unwrap();
        assert!(store.get("live").await.unwrap().is_some());
    }
}

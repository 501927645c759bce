//! Directory-backed cache store.
//!
//! Each entry is one JSON document `{expires, value, tags}` named after the
//! SHA-256 of its key. Tag flushes scan the whole directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::store::{CacheEntry, CacheStore};
use crate::error::{DbError, DbResult};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a cache directory.
    pub async fn open(dir: impl AsRef<Path>) -> DbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            DbError::cache(format!("Cannot create cache directory {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{digest:x}.{EXTENSION}"))
    }

    async fn read_entry(path: &Path) -> DbResult<Option<CacheEntry>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DbError::cache(format!("Cannot read {}: {e}", path.display())));
            }
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // A torn or foreign file counts as a miss
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache file");
                remove_file(path).await?;
                Ok(None)
            }
        }
    }

    async fn entry_paths(&self) -> DbResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await.map_err(|e| {
            DbError::cache(format!("Cannot list {}: {e}", self.dir.display()))
        })?;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| DbError::cache(e.to_string()))?
        {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

async fn remove_file(path: &Path) -> DbResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DbError::cache(format!("Cannot remove {}: {e}", path.display()))),
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> DbResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let Some(mut entry) = Self::read_entry(&path).await? else {
            return Ok(None);
        };
        if entry.is_expired() {
            remove_file(&path).await?;
            return Ok(None);
        }
        entry.key = key.to_string();
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> DbResult<()> {
        let path = self.path_for(&entry.key);
        let body = serde_json::to_vec(&entry)?;
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

        fs::write(&tmp, body)
            .await
            .map_err(|e| DbError::cache(format!("Cannot write {}: {e}", tmp.display())))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(DbError::cache(format!("Cannot write {}: {e}", path.display())));
        }
        Ok(())
    }

    async fn forget(&self, key: &str) -> DbResult<bool> {
        remove_file(&self.path_for(key)).await
    }

    async fn flush(&self) -> DbResult<()> {
        let paths = self.entry_paths().await?;
        for path in &paths {
            remove_file(path).await?;
        }
        debug!(dir = %self.dir.display(), removed = paths.len(), "File cache flushed");
        Ok(())
    }

    async fn flush_tags(&self, tags: &[String]) -> DbResult<usize> {
        let mut removed = 0;
        for path in self.entry_paths().await? {
            let Some(entry) = Self::read_entry(&path).await? else {
                continue;
            };
            if entry.tags.iter().any(|t| tags.contains(t)) && remove_file(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .put(CacheEntry::new("users:1", json!({"id": 1}), None, vec!["table:users".into()]))
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        let name = path.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(name.len(), 64);

        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(body, json!({"expires": 0, "value": {"id": 1}, "tags": ["table:users"]}));
    }

    #[tokio::test]
    async fn test_get_forget_and_flush_tags() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("nested")).await.unwrap();
        store
            .put(CacheEntry::new("a", json!(1), None, vec!["table:users".into()]))
            .await
            .unwrap();
        store
            .put(CacheEntry::new("b", json!(2), None, vec!["table:posts".into()]))
            .await
            .unwrap();

        let hit = store.get("a").await.unwrap().unwrap();
        assert_eq!(hit.key, "a");
        assert_eq!(hit.value, json!(1));

        assert_eq!(store.flush_tags(&["table:users".into()]).await.unwrap(), 1);
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());

        assert!(store.forget("b").await.unwrap());
        assert!(!store.forget("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_file_is_deleted() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let mut entry = CacheEntry::new("old", json!(null), None, vec![]);
        entry.expires = 1;
        store.put(entry).await.unwrap();
        assert!(store.get("old").await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_flush_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        for key in ["x", "y", "z"] {
            store.put(CacheEntry::new(key, json!(key), None, vec![])).await.unwrap();
        }
        store.flush().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

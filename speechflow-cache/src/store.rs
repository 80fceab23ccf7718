//! Content-addressed artifact cache with atomic, concurrent-writer-safe writes.
//!
//! Grounded in the write-then-register lifecycle of `Cache::add` and the
//! create/write/finish staging of `Download` in the teacher's `pmocache`
//! crate, generalized here with an explicit `.part`-then-rename step so two
//! concurrent writers for the same identifier never leave a half-written
//! file visible to a reader (spec.md §5, Design Notes).

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::CacheError;

/// An on-disk cache of model/artifact files keyed by an opaque identifier
/// (typically a model name plus version, or a content hash).
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Opens (creating if necessary) a cache store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| CacheError::Io { source })?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(Self::sanitize_key(key))
    }

    fn part_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.part", Self::sanitize_key(key)))
    }

    /// Identifiers are hashed to a fixed-width hex filename so arbitrary
    /// identifier strings (URLs, model names with slashes, ...) are always
    /// safe path components.
    fn sanitize_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True if `key` is present and fully written.
    pub async fn contains(&self, key: &str) -> bool {
        fs::metadata(self.key_path(key)).await.is_ok()
    }

    /// Returns the path to the cached artifact for `key`, if present.
    pub async fn get(&self, key: &str) -> Option<PathBuf> {
        let path = self.key_path(key);
        fs::metadata(&path).await.ok().map(|_| path)
    }

    /// Stores `data` under `key`. Writes to a `.part` sibling then renames
    /// into place, so a reader never observes a partial write; if two
    /// writers race for the same key, the last rename wins and both produce
    /// a complete, valid file.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<PathBuf, CacheError> {
        let part_path = self.part_path(key);
        let final_path = self.key_path(key);

        fs::write(&part_path, data)
            .await
            .map_err(|source| CacheError::Io { source })?;
        fs::rename(&part_path, &final_path)
            .await
            .map_err(|source| CacheError::Io { source })?;

        debug!(key, path = %final_path.display(), "cache entry written");
        Ok(final_path)
    }

    /// Ensures `key` is present, calling `fetch` to produce the bytes if it
    /// is not. `fetch` may run even if another writer is concurrently
    /// fetching the same key; the resulting file is still consistent
    /// because `put` never exposes a partial write.
    pub async fn ensure<F, Fut, E>(&self, key: &str, fetch: F) -> Result<PathBuf, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(path) = self.get(key).await {
            return Ok(path);
        }

        let data = fetch()
            .await
            .map_err(|e| CacheError::Fetch(Box::new(e)))?;
        self.put(key, &data).await
    }

    /// Removes a cached entry, if present.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.key_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(key, "cache entry removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();

        assert!(!store.contains("model-a").await);
        let path = store.put("model-a", b"hello").await.unwrap();
        assert!(store.contains("model-a").await);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn put_never_leaves_a_dangling_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();

        store.put("model-a", b"hello").await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert!(names.iter().all(|n| !n.ends_with(".part")));
    }

    #[tokio::test]
    async fn ensure_only_fetches_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();

        let calls = std::sync::atomic::AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, std::io::Error>(b"data".to_vec())
        };

        store.ensure("k", fetch).await.unwrap();
        store.ensure("k", fetch).await.unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();

        store.put("k", b"x").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(!store.contains("k").await);
    }
}

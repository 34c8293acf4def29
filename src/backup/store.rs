//! Snapshot storage backends
//!
//! The backup controller only needs a small key/blob interface. Every
//! failure is reported as `StorageError` so callers can treat it as
//! recoverable.

use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Key/blob store holding snapshot documents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()>;

    /// Fetch a blob, or None if the key is absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Keys starting with `prefix`, in ascending order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

fn storage_error(action: &str, key: &str, error: impl std::fmt::Display) -> anyhow::Error {
    MatchmakingError::StorageError {
        message: format!("Failed to {} {}: {}", action, key, error),
    }
    .into()
}

/// Process-local store for tests and `backend = "memory"`
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), blob);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

/// Stores each key as a file below a root directory. Writes go to a
/// temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(storage_error("resolve", key, "invalid key"));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create directory for", key, e))?;
        }

        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, &blob)
            .await
            .map_err(|e| storage_error("write", key, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| storage_error("commit", key, e))?;

        debug!("Wrote {} bytes to {}", blob.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // "snapshots/snap-" lists snapshots/ and keeps names starting "snap-"
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = self.root.join(dir_part);

        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list", prefix, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| storage_error("list", prefix, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(name_prefix) && !name.ends_with(".tmp") {
                let is_file = entry
                    .file_type()
                    .await
                    .map(|t| t.is_file())
                    .unwrap_or(false);
                if is_file {
                    keys.push(format!("{}{}", dir_part, name));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", key, e)),
        }
    }
}

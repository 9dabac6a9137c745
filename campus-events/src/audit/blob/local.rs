//! Filesystem-backed cold storage
//!
//! Maps object keys onto paths below a root directory, typically a mounted
//! bucket or a network share.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::BlobStore;
use crate::error::{Error, Result};

/// Cold storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::Validation(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Blob(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        // Write then rename so a listed key is always a complete object
        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| Error::Blob(format!("Failed to write {}: {}", staging.display(), e)))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| Error::Blob(format!("Failed to finalize {}: {}", path.display(), e)))?;

        tracing::debug!(key, content_type, bytes = bytes.len(), "Object stored");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk only the directory the prefix points into
        let start = match prefix.rfind('/') {
            Some(pos) => self.root.join(&prefix[..pos]),
            None => self.root.clone(),
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::Blob(format!("Failed to list {}: {}", dir.display(), e)))
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_some_and(|ext| ext == "partial") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ObjectStore, StoreError};

/// Filesystem-backed store rooted at a single directory. Keys are paths
/// relative to that directory.
pub struct LocalStore {
    base_dir: PathBuf,
}

impl LocalStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute location of a key, for log lines and persisted paths.
    pub fn resolve(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
}

fn io_error(op: &str, path: &Path, e: io::Error) -> StoreError {
    StoreError::Internal(format!("{op} {}: {e}", path.display()))
}

impl LocalStore {
    /// Every regular file below `dir`, skipping in-flight temp files.
    async fn walk(&self, dir: PathBuf) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        let mut pending = vec![dir];
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("list", &current, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error("list", &current, e))?
            {
                let path = entry.path();
                let kind = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error("stat", &path, e))?;
                if kind.is_dir() {
                    pending.push(path);
                } else if !is_temp_file(&path) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("mkdir", parent, e))?;
        }
        // Readers only ever see the renamed, complete file.
        let tmp = temp_path(&path);
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("rename", &path, e))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.resolve(key);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
                _ => io_error("read", &path, e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.resolve(key);
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(io_error("delete", &path, e)),
            _ => Ok(()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .walk(self.resolve(prefix))
            .await?
            .iter()
            .filter_map(|path| path.strip_prefix(&self.base_dir).ok())
            .map(|rel| rel.to_string_lossy().into_owned())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(key);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("stat", &path, e))
    }
}

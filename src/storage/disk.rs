//! One-file-per-key storage under a root directory.
//!
//! File names are the SHA-256 of the key, so arbitrary keys are safe to use.
//! Values are written to a uniquely named temporary file first and renamed into
//! place, which makes every write atomic with respect to readers.

use super::CacheStorage;
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

const TMP_EXTENSION: &str = "tmp";

/// A store that keeps each value in its own file.
pub struct DiskStorage {
    root: PathBuf,
    next_tmp_id: AtomicU64,
}

impl DiskStorage {
    /// Opens the store, creating `root` if needed.
    ///
    /// Fails with [`StorageError::InvalidRoot`] if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::InvalidRoot {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            next_tmp_id: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join(hex::encode(digest))
    }

    fn tmp_path_for(&self, final_path: &Path) -> PathBuf {
        let id = self.next_tmp_id.fetch_add(1, Ordering::Relaxed);
        final_path.with_extension(format!("{}.{}.{}", std::process::id(), id, TMP_EXTENSION))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp_path = self.tmp_path_for(&path);
        trace!("Writing {} bytes for key {} to {:?}", value.len(), key, path);

        if let Err(e) = tokio::fs::write(&tmp_path, &value).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;
    use std::sync::Arc;

    #[tokio::test]
    async fn disk_storage_conformance() {
        let dir = tempfile::tempdir().unwrap();
        conformance::run_all(Arc::new(DiskStorage::new(dir.path()).unwrap())).await;
    }

    #[tokio::test]
    async fn creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("cache");
        let storage = DiskStorage::new(&root).unwrap();
        assert!(root.is_dir());
        storage.set("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn uncreatable_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"not a directory").unwrap();

        match DiskStorage::new(file.join("cache")) {
            Err(StorageError::InvalidRoot { path, .. }) => assert!(path.ends_with("cache")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error for a root below a regular file"),
        }
    }

    #[tokio::test]
    async fn leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).unwrap();
        for i in 0..5 {
            storage
                .set("same-key", Bytes::from(format!("v{}", i)))
                .await
                .unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].ends_with(TMP_EXTENSION));
        assert_eq!(
            storage.get("same-key").await.unwrap(),
            Some(Bytes::from_static(b"v4"))
        );
    }
}

//! # Storage Module
//!
//! Key/value byte stores that back the HTTP cache.
//!
//! ## Overview
//!
//! A [`CacheStorage`] knows nothing about HTTP: it maps string keys to opaque
//! byte blobs. Freshness and cacheability decisions live in
//! [`crate::cache::policy`]; the two are combined by [`crate::cache::HttpCache`].
//!
//! ## Backends
//!
//! - [`MemoryStorage`]: an in-process concurrent map, optionally bounded.
//! - [`DiskStorage`]: one file per key under a root directory.
//! - [`LogStorage`]: a key-ordered store with batched writes, on SQLite.
//!
//! ## Guarantees
//!
//! All backends are safe to share between tasks. Operations on distinct keys are
//! independent. Concurrent writes to the same key resolve last-writer-wins and a
//! reader never observes a partially written value.

mod disk;
mod log_store;
mod memory;

pub use disk::DiskStorage;
pub use log_store::LogStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;

/// A concurrent key/value byte store.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    /// Returns the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value atomically.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Flushes buffered writes and releases resources.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Behavioural suite every backend must pass.
#[cfg(test)]
pub(crate) mod conformance {
    use super::CacheStorage;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    pub(crate) async fn run_all(storage: Arc<dyn CacheStorage>) {
        set_then_get(storage.as_ref()).await;
        missing_key(storage.as_ref()).await;
        overwrite(storage.as_ref()).await;
        delete_then_get(storage.as_ref()).await;
        concurrent_distinct_keys(Arc::clone(&storage)).await;
    }

    async fn set_then_get(storage: &dyn CacheStorage) {
        let value = Bytes::from_static(b"some value");
        storage.set("set-get", value.clone()).await.unwrap();
        assert_eq!(storage.get("set-get").await.unwrap(), Some(value));
    }

    async fn missing_key(storage: &dyn CacheStorage) {
        assert_eq!(storage.get("never-written").await.unwrap(), None);
        storage.delete("never-written").await.unwrap();
    }

    async fn overwrite(storage: &dyn CacheStorage) {
        storage.set("overwrite", Bytes::from_static(b"first")).await.unwrap();
        storage.set("overwrite", Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(
            storage.get("overwrite").await.unwrap(),
            Some(Bytes::from_static(b"second"))
        );
    }

    async fn delete_then_get(storage: &dyn CacheStorage) {
        storage.set("delete-me", Bytes::from_static(b"x")).await.unwrap();
        storage.delete("delete-me").await.unwrap();
        assert_eq!(storage.get("delete-me").await.unwrap(), None);
    }

    async fn concurrent_distinct_keys(storage: Arc<dyn CacheStorage>) {
        const WRITERS: usize = 32;

        let mut tasks = JoinSet::new();
        for i in 0..WRITERS {
            let storage = Arc::clone(&storage);
            tasks.spawn(async move {
                let key = format!("concurrent-{}", i);
                let value = Bytes::from(format!("value-{}", i).repeat(64));
                storage.set(&key, value).await.unwrap();
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        for i in 0..WRITERS {
            let key = format!("concurrent-{}", i);
            let expected = Bytes::from(format!("value-{}", i).repeat(64));
            assert_eq!(storage.get(&key).await.unwrap(), Some(expected), "key {}", key);
        }
    }
}

//! In-memory storage backed by a concurrent `moka` cache.

use super::CacheStorage;
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use moka::sync::Cache;

/// An in-process store. Contents are lost when the process exits.
#[derive(Clone)]
pub struct MemoryStorage {
    entries: Cache<String, Bytes>,
}

impl MemoryStorage {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// Creates a store holding at most about `max_entries` values. Eviction
    /// follows moka's TinyLFU admission, so rarely read entries go first.
    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    /// Approximate number of stored entries.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.entries.get(key))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.invalidate(key);
        Ok(())
    }
}

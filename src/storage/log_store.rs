//! Ordered, batched storage on an embedded SQLite database.
//!
//! Writes are collected in an in-memory batch (the memtable) and committed to
//! the `entries` table in a single transaction once the batch is full. Keys
//! are the table's primary key, so iteration is in key order. Deletes are
//! batched too and applied as `DELETE` statements.
//!
//! Pending writes are flushed by [`CacheStorage::close`] and, as a last resort,
//! when the store is dropped. A failed commit rolls back and keeps the batch,
//! so the next flush retries it.

use super::CacheStorage;
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, trace};

const DEFAULT_BATCH_SIZE: usize = 64;

const SCHEMA: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;
    CREATE TABLE IF NOT EXISTS entries (
        key   TEXT PRIMARY KEY,
        value BLOB NOT NULL
    ) WITHOUT ROWID;";

struct LogInner {
    conn: Connection,
    memtable: BTreeMap<String, Option<Bytes>>,
}

/// A key-ordered store with batched writes.
pub struct LogStorage {
    path: PathBuf,
    batch_size: usize,
    inner: Arc<Mutex<LogInner>>,
}

impl LogStorage {
    /// Opens (or creates) the database at `path` with the default batch size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::with_batch_size(path, DEFAULT_BATCH_SIZE)
    }

    /// Opens (or creates) the database at `path`, committing every
    /// `batch_size` writes.
    pub fn with_batch_size<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::InvalidRoot {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened log storage {:?}", path);

        Ok(Self {
            path,
            batch_size: batch_size.max(1),
            inner: Arc::new(Mutex::new(LogInner {
                conn,
                memtable: BTreeMap::new(),
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All live keys in ascending order, including unflushed writes.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.blocking(|inner| {
            let mut stmt = inner.conn.prepare("SELECT key FROM entries ORDER BY key")?;
            let mut keys: BTreeMap<String, bool> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|key| key.map(|key| (key, true)))
                .collect::<Result<_, _>>()?;
            for (key, value) in &inner.memtable {
                keys.insert(key.clone(), value.is_some());
            }
            Ok(keys
                .into_iter()
                .filter(|(_, live)| *live)
                .map(|(key, _)| key)
                .collect())
        })
        .await
    }

    /// Commits the pending batch.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.blocking(flush_memtable).await
    }

    async fn write(&self, key: &str, value: Option<Bytes>) -> Result<(), StorageError> {
        let key = key.to_string();
        let batch_size = self.batch_size;
        self.blocking(move |inner| {
            inner.memtable.insert(key, value);
            if inner.memtable.len() >= batch_size {
                flush_memtable(inner)?;
            }
            Ok(())
        })
        .await
    }

    /// Runs `op` against the connection on the blocking thread pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut LogInner) -> Result<T, StorageError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&mut *inner.lock()))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }
}

fn flush_memtable(inner: &mut LogInner) -> Result<(), StorageError> {
    if inner.memtable.is_empty() {
        return Ok(());
    }

    let tx = inner.conn.transaction()?;
    {
        let mut upsert = tx.prepare_cached(
            "INSERT INTO entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        let mut remove = tx.prepare_cached("DELETE FROM entries WHERE key = ?1")?;
        for (key, value) in &inner.memtable {
            match value {
                Some(value) => upsert.execute(params![key, value.as_ref()])?,
                None => remove.execute(params![key])?,
            };
        }
    }
    tx.commit()?;
    trace!("Committed {} pending writes", inner.memtable.len());
    inner.memtable.clear();
    Ok(())
}

#[async_trait]
impl CacheStorage for LogStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let key = key.to_string();
        self.blocking(move |inner| {
            if let Some(pending) = inner.memtable.get(&key) {
                return Ok(pending.clone());
            }
            let value = inner
                .conn
                .query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value.map(Bytes::from))
        })
        .await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.write(key, Some(value)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.write(key, None).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.flush().await?;
        debug!("Closed log storage {:?}", self.path);
        Ok(())
    }
}

impl Drop for LogStorage {
    fn drop(&mut self) {
        if let Err(e) = flush_memtable(&mut *self.inner.lock()) {
            error!("Failed to flush log storage {:?} on drop: {}", self.path, e);
        }
    }
}

//! Ordered byte-keyed storage for the cask blob store.
//!
//! A thin layer over sled exposing exactly what the rest of the system
//! needs: `set`/`get`/`remove` plus forward and reverse range scans with
//! inclusive bounds. Backs both the pack index and the replication queue.
//!
//! Writes are serialized by the backend; reads observe consistent
//! snapshots and never block behind writers.

use std::path::Path;

use thiserror::Error;

/// Errors from range-index operations.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("index backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for range-index operations.
pub type KvResult<T> = Result<T, KvError>;

/// A database holding one or more named [`RangeIndex`] trees.
#[derive(Clone)]
pub struct RangeDb {
    db: sled::Db,
}

impl RangeDb {
    /// Open (or create) a database at the given directory.
    pub fn open(path: &Path) -> KvResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database that is discarded on drop.
    pub fn open_temporary() -> KvResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Open (or create) a named index within this database.
    pub fn index(&self, name: &str) -> KvResult<RangeIndex> {
        let tree = self.db.open_tree(name)?;
        Ok(RangeIndex { tree })
    }

    /// Flush all trees to durable storage.
    pub fn flush(&self) -> KvResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for RangeDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeDb").finish_non_exhaustive()
    }
}

/// An ordered map from byte keys to byte values.
#[derive(Clone)]
pub struct RangeIndex {
    tree: sled::Tree,
}

impl RangeIndex {
    /// Set `key` to `value`, replacing any previous value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    /// Get the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    /// Remove `key`. Returns `true` if it was present.
    pub fn remove(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.tree.remove(key)?.is_some())
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.tree.contains_key(key)?)
    }

    /// Iterate `(key, value)` pairs with `min <= key <= max`, in forward or
    /// reverse lexicographic order.
    ///
    /// The iterator observes a snapshot-consistent view: entries inserted
    /// after the scan begins may or may not appear, but no entry is yielded
    /// twice.
    pub fn range(&self, min: &[u8], max: &[u8], reverse: bool) -> RangeIter {
        let inner = self.tree.range(min.to_vec()..=max.to_vec());
        RangeIter { inner, reverse }
    }

    /// Number of entries. Linear in tree size; intended for tests and
    /// queue-bound checks, not hot paths.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush this index to durable storage.
    pub fn flush(&self) -> KvResult<()> {
        self.tree.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for RangeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeIndex")
            .field("entries", &self.tree.len())
            .finish()
    }
}

/// Iterator over a bounded key range.
pub struct RangeIter {
    inner: sled::Iter,
    reverse: bool,
}

impl Iterator for RangeIter {
    type Item = KvResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = if self.reverse {
            self.inner.next_back()
        } else {
            self.inner.next()
        };
        item.map(|res| {
            res.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(KvError::from)
        })
    }
}

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

/// Error from a remote object store operation. The worker treats every
/// remote failure as retryable.
#[derive(Debug, Error)]
#[error("remote object store: {0}")]
pub struct RemoteError(pub String);

/// Result alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote object storage, keyed by hex blob hash.
///
/// The production implementation targets an S3 bucket (feature `s3`); the
/// in-memory implementation backs tests. Uploads are content-addressed, so
/// a duplicate put of the same key is harmless by construction.
pub trait RemoteStore: Send + Sync {
    /// Upload an object. Overwrites are allowed (idempotent payloads).
    fn put_object(&self, key: &str, body: Vec<u8>) -> RemoteResult<()>;

    /// Download an object, or `None` if absent.
    fn get_object(&self, key: &str) -> RemoteResult<Option<Vec<u8>>>;

    /// Returns `true` if the object exists.
    fn exists(&self, key: &str) -> RemoteResult<bool>;

    /// List every object key in the bucket.
    fn list(&self) -> RemoteResult<Vec<String>>;
}

/// In-memory remote store for tests. Counts puts per key so tests can
/// assert at-least-once/exactly-once delivery.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    put_counts: Mutex<HashMap<String, usize>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `key` has been put.
    pub fn put_count(&self, key: &str) -> usize {
        self.put_counts
            .lock()
            .expect("lock poisoned")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("lock poisoned").len()
    }

    /// Returns `true` if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().expect("lock poisoned").is_empty()
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn put_object(&self, key: &str, body: Vec<u8>) -> RemoteResult<()> {
        *self
            .put_counts
            .lock()
            .expect("lock poisoned")
            .entry(key.to_string())
            .or_insert(0) += 1;
        self.objects
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), body);
        Ok(())
    }

    fn get_object(&self, key: &str) -> RemoteResult<Option<Vec<u8>>> {
        Ok(self.objects.lock().expect("lock poisoned").get(key).cloned())
    }

    fn exists(&self, key: &str) -> RemoteResult<bool> {
        Ok(self.objects.lock().expect("lock poisoned").contains_key(key))
    }

    fn list(&self) -> RemoteResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for InMemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRemoteStore")
            .field("objects", &self.len())
            .finish()
    }
}

use cask_types::BlobRef;
use thiserror::Error;

/// Errors from handing a blob to the replication queue.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The queue's configured bound was reached.
    #[error("replication queue is full")]
    QueueFull,

    /// The queue backend failed.
    #[error("replication sink error: {0}")]
    Backend(String),
}

/// Destination for hashes awaiting replication.
///
/// Implemented by the S3 replication queue. `enqueue` must return only
/// after the entry is durable: a successfully acknowledged put guarantees
/// the blob will eventually be replicated.
pub trait ReplicationSink: Send + Sync {
    /// Durably enqueue a hash for upload. Idempotent on `hash`.
    fn enqueue(&self, hash: &BlobRef) -> Result<(), SinkError>;
}

use cask_types::BlobRef;
use thiserror::Error;

/// Errors surfaced by the blob store facade.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The inbound blob's hash does not match its bytes. Caller bug;
    /// non-retryable.
    #[error("blob failed hash verification: {0}")]
    BadHash(String),

    /// The blob exceeds the per-blob size limit.
    #[error("blob of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    /// The requested blob is absent locally.
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    /// Pack storage failure (I/O, corruption).
    #[error(transparent)]
    Pack(#[from] cask_pack::PackError),

    /// An event hub subscriber failed; the local write (if any) remains.
    #[error(transparent)]
    Subscriber(#[from] cask_hub::HubError),

    /// The replication queue hit its configured bound; retry the put.
    #[error("replication queue is full")]
    QueueFull,

    /// The replication enqueue failed for another reason.
    #[error("replication enqueue failed: {0}")]
    Replication(String),

    /// The operation's context was canceled.
    #[error("operation canceled")]
    Canceled,
}

/// Result alias for facade operations.
pub type StoreResult<T> = Result<T, StoreError>;

use thiserror::Error;

/// Errors from replication operations.
#[derive(Debug, Error)]
pub enum ReplError {
    /// Queue storage failure.
    #[error("replication queue error: {0}")]
    Queue(#[from] cask_kv::KvError),

    /// A queue entry's value cannot be decoded.
    #[error("corrupt queue entry: {0}")]
    CorruptEntry(String),

    /// The queue's configured bound was reached.
    #[error("replication queue is full")]
    QueueFull,

    /// Local blob store failure while reading or restoring.
    #[error(transparent)]
    Store(#[from] cask_store::StoreError),

    /// Remote object storage failure.
    #[error("remote store error: {0}")]
    Remote(String),

    /// Sealing or opening an encrypted payload failed.
    #[error(transparent)]
    Seal(#[from] cask_crypto::SealError),

    /// The replication key file is unusable.
    #[error("bad replication key file: {0}")]
    BadKeyFile(String),

    /// Disk I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation's context was canceled.
    #[error("operation canceled")]
    Canceled,
}

/// Result alias for replication operations.
pub type ReplResult<T> = Result<T, ReplError>;

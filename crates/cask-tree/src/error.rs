use thiserror::Error;

/// Errors from tree ingestion and restore.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Blob store failure.
    #[error(transparent)]
    Store(#[from] cask_store::StoreError),

    /// Chunking failure (I/O from the source stream).
    #[error(transparent)]
    Chunk(#[from] cask_chunk::ChunkError),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Node JSON encoding or decoding failure.
    #[error("node serialization error: {0}")]
    Serialization(String),

    /// A node reference is not a valid blob hash.
    #[error("bad node ref: {0}")]
    BadRef(String),

    /// A node's structure or content digest does not check out.
    #[error("corrupt node {hash}: {reason}")]
    CorruptNode { hash: String, reason: String },

    /// The operation's context was canceled.
    #[error("operation canceled")]
    Canceled,
}

/// Result alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

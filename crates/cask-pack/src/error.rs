use cask_types::BlobRef;
use thiserror::Error;

/// Errors from pack storage operations.
#[derive(Debug, Error)]
pub enum PackError {
    /// The requested blob is not in the index.
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    /// A record's framing is invalid (bad magic, impossible length).
    #[error("corrupt record in pack {pack_id:08x} at offset {offset}: {reason}")]
    CorruptRecord {
        pack_id: u32,
        offset: u64,
        reason: String,
    },

    /// The index points at bytes that no longer match the blob. Reads of
    /// this blob are fatal until a scan/restore repairs the store.
    #[error("corrupted pack {pack_id:08x}: blob {hash} failed verification")]
    CorruptedPack { pack_id: u32, hash: BlobRef },

    /// The index entry for a blob cannot be decoded.
    #[error("corrupt index entry for {0}")]
    CorruptIndexEntry(BlobRef),

    /// Underlying index failure.
    #[error("pack index error: {0}")]
    Index(#[from] cask_kv::KvError),

    /// Disk I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for pack storage operations.
pub type PackResult<T> = Result<T, PackError>;

use std::fmt;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Upper bound on a single blob's payload, in bytes.
pub const MAX_BLOB_SIZE: usize = 16 * 1024 * 1024;

type Blake2b256 = Blake2b<U32>;

/// Content-addressed reference to a blob.
///
/// A `BlobRef` is the BLAKE2b-256 digest of a blob's bytes. Identical
/// content always produces the same `BlobRef`, making blobs deduplicatable
/// and verifiable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobRef([u8; 32]);

impl BlobRef {
    /// Compute a `BlobRef` from raw content.
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Wrap a pre-computed 32-byte digest.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.short_hex())
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for BlobRef {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<BlobRef> for [u8; 32] {
    fn from(r: BlobRef) -> Self {
        r.0
    }
}

/// A blob: content-addressed reference plus the bytes it names.
///
/// The pairing is a claim, not a fact; [`Blob::check`] verifies it. Every
/// store entry point re-verifies before persisting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub hash: BlobRef,
    pub data: Vec<u8>,
}

impl Blob {
    /// Build a blob from raw bytes, computing its reference.
    pub fn from_data(data: Vec<u8>) -> Self {
        let hash = BlobRef::from_data(&data);
        Self { hash, data }
    }

    /// Build a blob from a claimed reference and bytes, unverified.
    pub fn new(hash: BlobRef, data: Vec<u8>) -> Self {
        Self { hash, data }
    }

    /// Verify that `hash` matches the digest of `data`.
    pub fn check(&self) -> Result<(), TypeError> {
        let computed = BlobRef::from_data(&self.data);
        if computed != self.hash {
            return Err(TypeError::HashMismatch {
                expected: self.hash.to_hex(),
                computed: computed.to_hex(),
            });
        }
        Ok(())
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for the empty blob.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A blob reference annotated with the payload size, as returned by
/// enumeration (the payload itself is not loaded).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedBlobRef {
    pub hash: BlobRef,
    pub size: u64,
}

impl SizedBlobRef {
    pub fn new(hash: BlobRef, size: u64) -> Self {
        Self { hash, size }
    }
}

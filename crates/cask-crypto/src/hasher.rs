use std::io::Read;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use cask_types::BlobRef;

type Blake2b256 = Blake2b<U32>;

/// Incremental BLAKE2b-256 hasher.
///
/// Used by the tree writer to digest a whole stream while it is being
/// chunked, without buffering the stream twice.
pub struct FullHasher {
    inner: Blake2b256,
}

impl FullHasher {
    pub fn new() -> Self {
        Self {
            inner: Blake2b256::new(),
        }
    }

    /// Feed more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest as a [`BlobRef`].
    pub fn finalize(self) -> BlobRef {
        BlobRef::from_hash(self.inner.finalize().into())
    }
}

impl Default for FullHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// A `Read` adapter that feeds every byte it yields into a [`FullHasher`].
///
/// Equivalent of a tee: the wrapped reader is consumed once, and the digest
/// of everything read so far can be taken at the end.
pub struct HashingReader<R> {
    inner: R,
    hasher: FullHasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: FullHasher::new(),
        }
    }

    /// Consume the adapter and return the digest of all bytes read.
    pub fn finalize(self) -> BlobRef {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

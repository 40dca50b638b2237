//! Content-defined chunking for the cask blob store.
//!
//! Splits a byte stream into variable-size chunks whose boundaries depend
//! only on the surrounding content, so an insertion shifts only the
//! boundaries near it. Boundaries are found with a 64-bit Rabin rolling
//! hash over a 64-byte window; a boundary is declared when the low bits of
//! the fingerprint are all zero.
//!
//! Identical input always produces identical chunk boundaries, regardless
//! of how the input is buffered or delivered.

pub mod chunker;
pub mod rolling;

pub use chunker::{Chunk, ChunkStream, ChunkerParams, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, SPLIT_MASK};
pub use rolling::{RollingHash, SPLIT_POLYNOMIAL, WINDOW_SIZE};

use thiserror::Error;

/// Errors from chunking a stream.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("I/O error while chunking: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for chunking operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

use std::io::{BufRead, BufReader, Read};

use crate::rolling::{RollingHash, WINDOW_SIZE};
use crate::ChunkResult;

/// Hard minimum chunk size: 512 KiB.
pub const MIN_CHUNK_SIZE: usize = 512 * 1024;

/// Hard maximum chunk size: 8 MiB.
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Boundary mask calibrated for an average chunk size of 1 MiB.
pub const SPLIT_MASK: u64 = (1 << 20) - 1;

/// Chunking parameters. The defaults are the repo-wide contract; other
/// values exist for tests that need small chunks.
#[derive(Clone, Copy, Debug)]
pub struct ChunkerParams {
    pub min_size: usize,
    pub max_size: usize,
    pub split_mask: u64,
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self {
            min_size: MIN_CHUNK_SIZE,
            max_size: MAX_CHUNK_SIZE,
            split_mask: SPLIT_MASK,
        }
    }
}

/// A single content-defined chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
}

impl Chunk {
    /// Chunk length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-length chunk (never produced by the stream).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lazy, finite, non-restartable sequence of content-defined chunks over a
/// reader.
///
/// Each chunk is at least `min_size` and at most `max_size` bytes, except
/// the final chunk which may be shorter. A boundary is declared when the
/// rolling fingerprint's low bits match `split_mask`. The first
/// `min_size - WINDOW_SIZE` bytes of each chunk are consumed without
/// hashing; the window is guaranteed full of real input before the first
/// boundary check.
pub struct ChunkStream<R> {
    reader: BufReader<R>,
    params: ChunkerParams,
    eof: bool,
}

impl<R: Read> ChunkStream<R> {
    /// Chunk `reader` with the default parameters.
    pub fn new(reader: R) -> Self {
        Self::with_params(reader, ChunkerParams::default())
    }

    /// Chunk `reader` with explicit parameters.
    pub fn with_params(reader: R, params: ChunkerParams) -> Self {
        debug_assert!(params.min_size > WINDOW_SIZE);
        debug_assert!(params.max_size >= params.min_size);
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
            params,
            eof: false,
        }
    }

    fn next_chunk(&mut self) -> ChunkResult<Option<Chunk>> {
        if self.eof {
            return Ok(None);
        }

        let mut data = Vec::with_capacity(self.params.min_size);
        let mut rolling = RollingHash::new();
        // Bytes consumed before the window starts sliding.
        let mut pre = self.params.min_size - WINDOW_SIZE;

        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                self.eof = true;
                if data.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(Chunk { data }));
            }

            let mut consumed = 0;
            for &b in buf {
                consumed += 1;
                data.push(b);

                if pre > 0 {
                    pre -= 1;
                    continue;
                }

                rolling.slide(b);

                if (data.len() >= self.params.min_size
                    && rolling.digest() & self.params.split_mask == 0)
                    || data.len() >= self.params.max_size
                {
                    self.reader.consume(consumed);
                    return Ok(Some(Chunk { data }));
                }
            }
            self.reader.consume(consumed);
        }
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = ChunkResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                // An I/O error ends the stream; the sequence is
                // non-restartable.
                self.eof = true;
                Some(Err(e))
            }
        }
    }
}

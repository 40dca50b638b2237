//! Pack file storage for the cask blob store.
//!
//! Blobs live in numbered append-only pack files
//! (`blobs-<pack_id:08x>.pack`), each a sequence of CRC-framed records; a
//! durable hash index maps each blob to its `(pack, offset, length)`
//! location and supports ordered enumeration.
//!
//! # Architecture
//!
//! - **record**: the bit-exact on-disk record codec
//! - **index**: sled-backed hash -> location map with recovery watermarks
//! - **store**: [`PackSet`], the append/read/enumerate engine with
//!   crash recovery at open

pub mod error;
pub mod index;
pub mod record;
pub mod store;

pub use error::{PackError, PackResult};
pub use index::{Location, PackIndex};
pub use record::{FLAG_ENCRYPTED, RECORD_MAGIC};
pub use store::{Enumerate, PackConfig, PackSet, PutOutcome, DEFAULT_MAX_PACK_SIZE};

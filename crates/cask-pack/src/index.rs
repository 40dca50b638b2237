use std::path::Path;

use cask_kv::{RangeDb, RangeIndex, RangeIter};
use cask_types::BlobRef;

use crate::error::{PackError, PackResult};

/// Where a blob's record lives on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub pack_id: u32,
    /// Byte offset of the record header within the pack.
    pub offset: u64,
    /// Payload length (not the record length).
    pub length: u32,
}

impl Location {
    fn encode(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.pack_id.to_be_bytes());
        out[4..12].copy_from_slice(&self.offset.to_be_bytes());
        out[12..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != 16 {
            return None;
        }
        Some(Self {
            pack_id: u32::from_be_bytes(buf[..4].try_into().ok()?),
            offset: u64::from_be_bytes(buf[4..12].try_into().ok()?),
            length: u32::from_be_bytes(buf[12..].try_into().ok()?),
        })
    }
}

/// Persistent map from blob hash to pack location, plus per-pack recovery
/// watermarks.
///
/// Two trees in one database:
/// - `blobs`: 32-byte raw hash -> encoded [`Location`]
/// - `packs`: `pack_id:u32_be` -> indexed-through byte offset (`u64_be`)
///
/// The watermark records how much of each pack the index has absorbed. A
/// pack file longer than its watermark means the process died between a
/// record append and the index commit; recovery re-scans the gap.
pub struct PackIndex {
    db: RangeDb,
    blobs: RangeIndex,
    packs: RangeIndex,
}

impl PackIndex {
    /// Open (or create) the index database under `dir`.
    pub fn open(dir: &Path) -> PackResult<Self> {
        let db = RangeDb::open(dir)?;
        let blobs = db.index("blobs")?;
        let packs = db.index("packs")?;
        Ok(Self { db, blobs, packs })
    }

    /// In-memory index for tests.
    pub fn open_temporary() -> PackResult<Self> {
        let db = RangeDb::open_temporary()?;
        let blobs = db.index("blobs")?;
        let packs = db.index("packs")?;
        Ok(Self { db, blobs, packs })
    }

    /// Look up a blob's location.
    pub fn get(&self, hash: &BlobRef) -> PackResult<Option<Location>> {
        match self.blobs.get(hash.as_bytes())? {
            Some(raw) => Location::decode(&raw)
                .map(Some)
                .ok_or(PackError::CorruptIndexEntry(*hash)),
            None => Ok(None),
        }
    }

    /// Returns `true` if the blob is indexed.
    pub fn contains(&self, hash: &BlobRef) -> PackResult<bool> {
        Ok(self.blobs.contains(hash.as_bytes())?)
    }

    /// Commit a blob location together with the pack watermark it implies,
    /// durably. The write is acknowledged only after this returns.
    pub fn commit(&self, hash: &BlobRef, location: Location, indexed_through: u64) -> PackResult<()> {
        self.blobs.set(hash.as_bytes(), &location.encode())?;
        self.packs
            .set(&location.pack_id.to_be_bytes(), &indexed_through.to_be_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// How far into `pack_id` the index has absorbed records.
    pub fn indexed_through(&self, pack_id: u32) -> PackResult<u64> {
        match self.packs.get(&pack_id.to_be_bytes())? {
            Some(raw) if raw.len() == 8 => {
                Ok(u64::from_be_bytes(raw.try_into().expect("checked len")))
            }
            Some(_) | None => Ok(0),
        }
    }

    /// Record the watermark for a pack without touching blob entries.
    pub fn set_indexed_through(&self, pack_id: u32, offset: u64) -> PackResult<()> {
        self.packs
            .set(&pack_id.to_be_bytes(), &offset.to_be_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Iterate blob entries with hashes in `[min, max]`, ascending.
    pub fn range(&self, min: &[u8; 32], max: &[u8; 32]) -> RangeIter {
        self.blobs.range(min, max, false)
    }

    /// Number of indexed blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns `true` if no blobs are indexed.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl std::fmt::Debug for PackIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackIndex")
            .field("blobs", &self.blobs.len())
            .finish()
    }
}

/// Decode an index range entry into `(hash, location)`.
pub(crate) fn decode_entry(key: &[u8], value: &[u8]) -> Option<(BlobRef, Location)> {
    let hash: [u8; 32] = key.try_into().ok()?;
    let location = Location::decode(value)?;
    Some((BlobRef::from_hash(hash), location))
}

use cask_types::{BlobRef, MAX_BLOB_SIZE};

use crate::error::{PackError, PackResult};

/// Record magic: "BLB1".
pub const RECORD_MAGIC: [u8; 4] = *b"BLB1";

/// Fixed header size: magic + flags + raw hash + length.
pub const HEADER_SIZE: usize = 4 + 1 + 32 + 4;

/// Trailing CRC32 size.
pub const TRAILER_SIZE: usize = 4;

/// Flag bit marking an encrypted payload.
pub const FLAG_ENCRYPTED: u8 = 0b0000_0001;

/// Parsed record header.
///
/// On-disk layout, all integers big-endian:
/// ```text
/// "BLB1" | flags: u8 | hash: 32 bytes raw | length: u32
/// | payload: length bytes | crc32(payload): u32
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: u8,
    pub hash: BlobRef,
    pub length: u32,
}

impl RecordHeader {
    /// Total on-disk size of the record this header describes.
    pub fn record_size(&self) -> u64 {
        (HEADER_SIZE + self.length as usize + TRAILER_SIZE) as u64
    }
}

/// Total on-disk size of a record for a payload of `len` bytes.
pub fn record_size(len: usize) -> u64 {
    (HEADER_SIZE + len + TRAILER_SIZE) as u64
}

/// Encode a full record.
pub fn encode(hash: &BlobRef, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    out.extend_from_slice(&RECORD_MAGIC);
    out.push(flags);
    out.extend_from_slice(hash.as_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    out
}

/// Decode a record header from its fixed-size prefix.
///
/// Only validates framing: magic and a plausible length. Payload integrity
/// is the caller's job (CRC on read, content hash during recovery).
pub fn decode_header(buf: &[u8; HEADER_SIZE], pack_id: u32, offset: u64) -> PackResult<RecordHeader> {
    if buf[..4] != RECORD_MAGIC {
        return Err(PackError::CorruptRecord {
            pack_id,
            offset,
            reason: "bad magic".into(),
        });
    }
    let flags = buf[4];
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&buf[5..37]);
    let length = u32::from_be_bytes(buf[37..41].try_into().expect("fixed slice"));
    if length as usize > MAX_BLOB_SIZE {
        return Err(PackError::CorruptRecord {
            pack_id,
            offset,
            reason: format!("length {length} exceeds blob size limit"),
        });
    }
    Ok(RecordHeader {
        flags,
        hash: BlobRef::from_hash(hash),
        length,
    })
}

/// Verify a payload against the CRC32 trailer.
pub fn verify_crc(payload: &[u8], trailer: [u8; TRAILER_SIZE]) -> bool {
    crc32fast::hash(payload) == u32::from_be_bytes(trailer)
}

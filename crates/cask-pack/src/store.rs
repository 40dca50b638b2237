use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use cask_types::{BlobRef, SizedBlobRef};

use crate::error::{PackError, PackResult};
use crate::index::{decode_entry, Location, PackIndex};
use crate::record::{self, HEADER_SIZE, TRAILER_SIZE};

/// Default rollover threshold for pack files: 256 MiB.
pub const DEFAULT_MAX_PACK_SIZE: u64 = 256 * 1024 * 1024;

/// Pack storage configuration.
#[derive(Clone, Debug)]
pub struct PackConfig {
    /// Directory holding pack files; the index lives in an `index/` subdir.
    pub dir: PathBuf,
    /// Rollover threshold: a pack that would exceed this gets a successor.
    pub max_pack_size: u64,
}

impl PackConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_pack_size: DEFAULT_MAX_PACK_SIZE,
        }
    }

    pub fn with_max_pack_size(mut self, bytes: u64) -> Self {
        self.max_pack_size = bytes;
        self
    }
}

/// Outcome of a pack-level put.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The blob was appended and indexed.
    Written,
    /// The blob was already present; nothing touched disk.
    AlreadyExists,
}

struct PackWriter {
    pack_id: u32,
    file: File,
    offset: u64,
}

/// On-disk blob storage: numbered append-only pack files plus a durable
/// hash index.
///
/// Writers serialize on a single append lock. Readers go through the index
/// and per-pack read handles and never block behind the writer. A record is
/// fsynced before its index entry is committed, so the index never points
/// past durable data; the converse gap (record on disk, index missing) is
/// healed by the recovery scan at open.
pub struct PackSet {
    config: PackConfig,
    index: PackIndex,
    writer: Mutex<PackWriter>,
    readers: RwLock<HashMap<u32, Arc<File>>>,
}

impl PackSet {
    /// Open the pack set, running recovery for any records the index has
    /// not absorbed and discarding truncated trailing records.
    pub fn open(config: PackConfig) -> PackResult<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let index = PackIndex::open(&config.dir.join("index"))?;

        let mut pack_ids = list_pack_ids(&config.dir)?;
        pack_ids.sort_unstable();
        for &pack_id in &pack_ids {
            recover_pack(&config.dir, &index, pack_id)?;
        }

        let mut head = pack_ids.last().copied().unwrap_or(0);
        let mut offset = pack_file_len(&config.dir, head)?;
        if offset >= config.max_pack_size {
            head += 1;
            offset = 0;
        }
        let file = open_for_append(&config.dir, head)?;

        info!(
            dir = %config.dir.display(),
            packs = pack_ids.len().max(1),
            blobs = index.len(),
            "pack set opened"
        );

        Ok(Self {
            config,
            index,
            writer: Mutex::new(PackWriter {
                pack_id: head,
                file,
                offset,
            }),
            readers: RwLock::new(HashMap::new()),
        })
    }

    /// Append a blob. Idempotent: a second put of the same hash is a no-op.
    ///
    /// On `Written`, the record has been fsynced and the index entry is
    /// durable before this returns.
    pub fn put(&self, hash: &BlobRef, data: &[u8]) -> PackResult<PutOutcome> {
        let mut w = self.writer.lock().expect("pack writer lock poisoned");

        if self.index.contains(hash)? {
            return Ok(PutOutcome::AlreadyExists);
        }

        let record = record::encode(hash, 0, data);
        if w.offset > 0 && w.offset + record.len() as u64 > self.config.max_pack_size {
            self.rotate(&mut w)?;
        }

        let offset = w.offset;
        w.file.write_all(&record)?;
        w.file.sync_data()?;

        self.index.commit(
            hash,
            Location {
                pack_id: w.pack_id,
                offset,
                length: data.len() as u32,
            },
            offset + record.len() as u64,
        )?;
        w.offset += record.len() as u64;

        debug!(hash = %hash, pack_id = w.pack_id, offset, len = data.len(), "blob appended");
        Ok(PutOutcome::Written)
    }

    /// Read a blob's payload.
    pub fn get(&self, hash: &BlobRef) -> PackResult<Vec<u8>> {
        let loc = self.index.get(hash)?.ok_or(PackError::NotFound(*hash))?;
        let file = self.reader(loc.pack_id)?;

        let mut buf = vec![0u8; HEADER_SIZE + loc.length as usize + TRAILER_SIZE];
        file.read_exact_at(&mut buf, loc.offset).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PackError::CorruptedPack {
                    pack_id: loc.pack_id,
                    hash: *hash,
                }
            } else {
                PackError::Io(e)
            }
        })?;

        let header = record::decode_header(
            buf[..HEADER_SIZE].try_into().expect("fixed slice"),
            loc.pack_id,
            loc.offset,
        )
        .map_err(|_| PackError::CorruptedPack {
            pack_id: loc.pack_id,
            hash: *hash,
        })?;

        let payload = &buf[HEADER_SIZE..HEADER_SIZE + loc.length as usize];
        let trailer: [u8; TRAILER_SIZE] = buf[HEADER_SIZE + loc.length as usize..]
            .try_into()
            .expect("fixed slice");

        if header.hash != *hash
            || header.length != loc.length
            || !record::verify_crc(payload, trailer)
        {
            return Err(PackError::CorruptedPack {
                pack_id: loc.pack_id,
                hash: *hash,
            });
        }

        Ok(payload.to_vec())
    }

    /// Index-only existence check.
    pub fn exists(&self, hash: &BlobRef) -> PackResult<bool> {
        self.index.contains(hash)
    }

    /// Iterate `(hash, size)` for blobs with `start <= hash < end`,
    /// ascending by hash. `limit == 0` means unbounded.
    ///
    /// The iteration observes a snapshot: blobs committed after it begins
    /// may or may not appear, and no blob appears twice.
    pub fn enumerate(&self, start: &BlobRef, end: &BlobRef, limit: usize) -> Enumerate {
        Enumerate {
            inner: self.index.range(start.as_bytes(), end.as_bytes()),
            end: *end.as_bytes(),
            limit,
            yielded: 0,
        }
    }

    /// Number of indexed blobs.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn rotate(&self, w: &mut PackWriter) -> PackResult<()> {
        w.file.sync_all()?;
        let next = w.pack_id + 1;
        let file = open_for_append(&self.config.dir, next)?;
        info!(from = w.pack_id, to = next, "pack rollover");
        // Dropping the previous append handle here; read handles are cached
        // separately and unaffected.
        w.pack_id = next;
        w.file = file;
        w.offset = 0;
        Ok(())
    }

    fn reader(&self, pack_id: u32) -> PackResult<Arc<File>> {
        if let Some(file) = self
            .readers
            .read()
            .expect("pack readers lock poisoned")
            .get(&pack_id)
        {
            return Ok(Arc::clone(file));
        }
        let file = Arc::new(File::open(pack_path(&self.config.dir, pack_id))?);
        let mut readers = self.readers.write().expect("pack readers lock poisoned");
        Ok(Arc::clone(readers.entry(pack_id).or_insert(file)))
    }
}

impl std::fmt::Debug for PackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackSet")
            .field("dir", &self.config.dir)
            .field("blobs", &self.index.len())
            .finish()
    }
}

/// Ordered blob enumeration over a half-open hash range.
pub struct Enumerate {
    inner: cask_kv::RangeIter,
    end: [u8; 32],
    limit: usize,
    yielded: usize,
}

impl Iterator for Enumerate {
    type Item = PackResult<SizedBlobRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.limit != 0 && self.yielded >= self.limit {
            return None;
        }
        loop {
            let (key, value) = match self.inner.next()? {
                Ok(kv) => kv,
                Err(e) => return Some(Err(e.into())),
            };
            // The underlying range is inclusive; the contract is [start, end).
            if key.as_slice() >= self.end.as_slice() {
                return None;
            }
            match decode_entry(&key, &value) {
                Some((hash, loc)) => {
                    self.yielded += 1;
                    return Some(Ok(SizedBlobRef::new(hash, loc.length as u64)));
                }
                None => {
                    warn!("skipping malformed index entry during enumeration");
                    continue;
                }
            }
        }
    }
}

fn pack_path(dir: &Path, pack_id: u32) -> PathBuf {
    dir.join(format!("blobs-{pack_id:08x}.pack"))
}

fn pack_file_len(dir: &Path, pack_id: u32) -> PackResult<u64> {
    match std::fs::metadata(pack_path(dir, pack_id)) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn open_for_append(dir: &Path, pack_id: u32) -> PackResult<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(pack_path(dir, pack_id))?)
}

fn list_pack_ids(dir: &Path) -> PackResult<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(hex) = name
            .strip_prefix("blobs-")
            .and_then(|s| s.strip_suffix(".pack"))
        else {
            continue;
        };
        if let Ok(id) = u32::from_str_radix(hex, 16) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Re-scan the portion of a pack the index has not absorbed, verifying
/// each record's content hash before trusting it. A truncated or corrupt
/// trailing record is discarded by truncating the pack back to the last
/// good boundary.
fn recover_pack(dir: &Path, index: &PackIndex, pack_id: u32) -> PackResult<()> {
    let file_len = pack_file_len(dir, pack_id)?;
    let indexed = index.indexed_through(pack_id)?;

    if file_len == indexed {
        return Ok(());
    }
    if file_len < indexed {
        // The pack shrank behind the index's back. Entries beyond the file
        // surface as CorruptedPack on read; nothing to recover here.
        warn!(pack_id, file_len, indexed, "pack shorter than index watermark");
        return Ok(());
    }

    info!(pack_id, from = indexed, to = file_len, "recovering pack records");
    let file = File::open(pack_path(dir, pack_id))?;

    let mut pos = indexed;
    let mut recovered = 0usize;
    let valid_end = loop {
        if pos == file_len {
            break pos;
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        if pos + HEADER_SIZE as u64 > file_len
            || file.read_exact_at(&mut header_buf, pos).is_err()
        {
            break pos;
        }
        let Ok(header) = record::decode_header(&header_buf, pack_id, pos) else {
            break pos;
        };
        if pos + header.record_size() > file_len {
            break pos;
        }

        let mut payload = vec![0u8; header.length as usize];
        let mut trailer = [0u8; TRAILER_SIZE];
        if file
            .read_exact_at(&mut payload, pos + HEADER_SIZE as u64)
            .is_err()
            || file
                .read_exact_at(
                    &mut trailer,
                    pos + HEADER_SIZE as u64 + header.length as u64,
                )
                .is_err()
        {
            break pos;
        }
        if !record::verify_crc(&payload, trailer) {
            break pos;
        }
        // Trust the recorded hash only after verifying it against the bytes.
        if BlobRef::from_data(&payload) != header.hash {
            break pos;
        }

        index.commit(
            &header.hash,
            Location {
                pack_id,
                offset: pos,
                length: header.length,
            },
            pos + header.record_size(),
        )?;
        recovered += 1;
        pos += header.record_size();
    };

    if valid_end < file_len {
        warn!(
            pack_id,
            valid_end,
            file_len,
            "discarding truncated trailing record"
        );
        let f = OpenOptions::new()
            .write(true)
            .open(pack_path(dir, pack_id))?;
        f.set_len(valid_end)?;
        f.sync_all()?;
    }
    if recovered == 0 {
        index.set_indexed_through(pack_id, valid_end)?;
    }

    info!(pack_id, recovered, "pack recovery complete");
    Ok(())
}

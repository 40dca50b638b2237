use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use cask_kv::{RangeDb, RangeIndex};
use cask_store::{ReplicationSink, SinkError};
use cask_types::BlobRef;

use crate::error::{ReplError, ReplResult};

/// Lifecycle state of a queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Pending = 0,
    InFlight = 1,
    Done = 2,
    Failed = 3,
}

impl EntryState {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Pending),
            1 => Some(Self::InFlight),
            2 => Some(Self::Done),
            3 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A decoded queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub seq: u64,
    pub hash: BlobRef,
    pub state: EntryState,
}

fn encode_value(hash: &BlobRef, state: EntryState) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[..32].copy_from_slice(hash.as_bytes());
    out[32] = state as u8;
    out
}

fn decode_value(seq: u64, raw: &[u8]) -> ReplResult<QueueEntry> {
    if raw.len() != 33 {
        return Err(ReplError::CorruptEntry(format!(
            "value of {} bytes for seq {seq}",
            raw.len()
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&raw[..32]);
    let state = EntryState::from_byte(raw[32])
        .ok_or_else(|| ReplError::CorruptEntry(format!("state byte {} for seq {seq}", raw[32])))?;
    Ok(QueueEntry {
        seq,
        hash: BlobRef::from_hash(hash),
        state,
    })
}

/// Durable FIFO of blob hashes awaiting upload.
///
/// Keys are `seq:u64_be` so a forward range scan is FIFO order; values are
/// `hash:32B raw || state:u8`. A companion tree maps hash -> seq so enqueue
/// is idempotent per hash. An entry is removed only after the remote put
/// for its hash succeeded.
pub struct ReplicationQueue {
    entries: RangeIndex,
    by_hash: RangeIndex,
    db: RangeDb,
    next_seq: AtomicU64,
    max_pending: Option<usize>,
}

impl ReplicationQueue {
    /// Open (or create) the queue database at `dir` (conventionally
    /// `<datadir>/s3-queue/`).
    pub fn open(dir: &Path) -> ReplResult<Self> {
        let db = RangeDb::open(dir)?;
        Self::with_db(db)
    }

    /// In-memory queue for tests.
    pub fn open_temporary() -> ReplResult<Self> {
        Self::with_db(RangeDb::open_temporary()?)
    }

    fn with_db(db: RangeDb) -> ReplResult<Self> {
        let entries = db.index("queue")?;
        let by_hash = db.index("by-hash")?;

        // Resume the sequence counter past the highest existing key.
        let next_seq = match entries.range(&[0u8; 8], &[0xFF; 8], true).next() {
            Some(kv) => {
                let (key, _) = kv?;
                let key: [u8; 8] = key
                    .as_slice()
                    .try_into()
                    .map_err(|_| ReplError::CorruptEntry("non-u64 queue key".into()))?;
                u64::from_be_bytes(key) + 1
            }
            None => 0,
        };

        Ok(Self {
            entries,
            by_hash,
            db,
            next_seq: AtomicU64::new(next_seq),
            max_pending: None,
        })
    }

    /// Bound the queue; `enqueue` past the bound fails with `QueueFull`.
    pub fn with_bound(mut self, max_pending: usize) -> Self {
        self.max_pending = Some(max_pending);
        self
    }

    /// Durably enqueue a hash. A hash already queued is a no-op.
    pub fn enqueue(&self, hash: &BlobRef) -> ReplResult<u64> {
        if let Some(raw) = self.by_hash.get(hash.as_bytes())? {
            let key: [u8; 8] = raw
                .as_slice()
                .try_into()
                .map_err(|_| ReplError::CorruptEntry("non-u64 by-hash value".into()))?;
            let seq = u64::from_be_bytes(key);
            debug!(hash = %hash, seq, "already queued");
            return Ok(seq);
        }

        if let Some(bound) = self.max_pending {
            if self.entries.len() >= bound {
                return Err(ReplError::QueueFull);
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.entries
            .set(&seq.to_be_bytes(), &encode_value(hash, EntryState::Pending))?;
        self.by_hash.set(hash.as_bytes(), &seq.to_be_bytes())?;
        self.db.flush()?;

        debug!(hash = %hash, seq, "queued for replication");
        Ok(seq)
    }

    /// The first entry in seq order that is ready to upload.
    pub fn next_pending(&self) -> ReplResult<Option<QueueEntry>> {
        for kv in self.entries.range(&[0u8; 8], &[0xFF; 8], false) {
            let (key, value) = kv?;
            let key: [u8; 8] = key
                .as_slice()
                .try_into()
                .map_err(|_| ReplError::CorruptEntry("non-u64 queue key".into()))?;
            let entry = decode_value(u64::from_be_bytes(key), &value)?;
            if entry.state == EntryState::Pending {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Transition an entry to a new state in place.
    pub fn mark(&self, seq: u64, state: EntryState) -> ReplResult<()> {
        let key = seq.to_be_bytes();
        let raw = self
            .entries
            .get(&key)?
            .ok_or_else(|| ReplError::CorruptEntry(format!("no entry for seq {seq}")))?;
        let entry = decode_value(seq, &raw)?;
        self.entries.set(&key, &encode_value(&entry.hash, state))?;
        Ok(())
    }

    /// Remove an entry after its upload succeeded.
    pub fn complete(&self, seq: u64) -> ReplResult<()> {
        let key = seq.to_be_bytes();
        if let Some(raw) = self.entries.get(&key)? {
            let entry = decode_value(seq, &raw)?;
            self.entries.remove(&key)?;
            self.by_hash.remove(entry.hash.as_bytes())?;
            self.db.flush()?;
            debug!(hash = %entry.hash, seq, "replicated");
        }
        Ok(())
    }

    /// Revert every `in_flight` entry to `pending`. Run at worker startup;
    /// an in-flight entry from a previous process was never confirmed.
    pub fn recover(&self) -> ReplResult<usize> {
        let mut reverted = 0;
        for kv in self.entries.range(&[0u8; 8], &[0xFF; 8], false) {
            let (key, value) = kv?;
            let key: [u8; 8] = key
                .as_slice()
                .try_into()
                .map_err(|_| ReplError::CorruptEntry("non-u64 queue key".into()))?;
            let seq = u64::from_be_bytes(key);
            let entry = decode_value(seq, &value)?;
            if entry.state == EntryState::InFlight {
                self.entries
                    .set(&key, &encode_value(&entry.hash, EntryState::Pending))?;
                reverted += 1;
            }
        }
        if reverted > 0 {
            self.db.flush()?;
            info!(reverted, "reverted in-flight queue entries to pending");
        }
        Ok(reverted)
    }

    /// Number of queued entries (any state).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ReplicationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationQueue")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ReplicationSink for ReplicationQueue {
    fn enqueue(&self, hash: &BlobRef) -> Result<(), SinkError> {
        match ReplicationQueue::enqueue(self, hash) {
            Ok(_) => Ok(()),
            Err(ReplError::QueueFull) => Err(SinkError::QueueFull),
            Err(e) => {
                warn!(hash = %hash, error = %e, "replication enqueue failed");
                Err(SinkError::Backend(e.to_string()))
            }
        }
    }
}

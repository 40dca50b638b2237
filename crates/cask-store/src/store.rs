use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use cask_hub::{EventKind, Hub};
use cask_pack::{PackConfig, PackError, PackSet, PutOutcome, DEFAULT_MAX_PACK_SIZE};
use cask_types::{Blob, BlobRef, Context, SizedBlobRef, MAX_BLOB_SIZE};

use crate::error::{StoreError, StoreResult};
use crate::sink::{ReplicationSink, SinkError};

/// Blob store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Data directory; pack files live under `<datadir>/blobs/`.
    pub datadir: PathBuf,
    /// Pack rollover threshold.
    pub max_pack_size: u64,
}

impl StoreConfig {
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        Self {
            datadir: datadir.into(),
            max_pack_size: DEFAULT_MAX_PACK_SIZE,
        }
    }

    pub fn with_max_pack_size(mut self, bytes: u64) -> Self {
        self.max_pack_size = bytes;
        self
    }
}

/// The blob store facade.
///
/// Composes the pack storage, the event hub, and (optionally) a
/// replication sink into the service contract: verified idempotent puts,
/// reads, existence checks, ordered enumeration and full scans.
///
/// A successful `put` means the blob is durable locally, enqueued for
/// replication when a sink is attached, and every `NewBlob` subscriber has
/// accepted it. A failure after the pack write leaves the blob stored:
/// put is crash-safe, not transactional across storage and replication.
pub struct BlobStore {
    packs: PackSet,
    hub: Arc<Hub>,
    sink: Option<Arc<dyn ReplicationSink>>,
}

impl BlobStore {
    /// Open the store under `config.datadir`, without replication.
    pub fn open(config: StoreConfig, hub: Arc<Hub>) -> StoreResult<Self> {
        let packs = PackSet::open(
            PackConfig::new(config.datadir.join("blobs"))
                .with_max_pack_size(config.max_pack_size),
        )?;
        info!(datadir = %config.datadir.display(), blobs = packs.len(), "blob store opened");
        Ok(Self {
            packs,
            hub,
            sink: None,
        })
    }

    /// Attach a replication sink; every subsequently accepted blob is
    /// enqueued before the put is acknowledged.
    pub fn with_replication(mut self, sink: Arc<dyn ReplicationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The event hub this store publishes through.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Store a blob.
    ///
    /// Verifies the hash, short-circuits if the blob exists, persists it,
    /// enqueues it for replication, then notifies `NewBlob` subscribers.
    /// Uncancellable once past verification.
    pub fn put(&self, ctx: &Context, blob: &Blob) -> StoreResult<()> {
        info!(
            hash = %blob.hash,
            len = blob.len(),
            ns = ctx.namespace().unwrap_or(""),
            "op put"
        );

        if blob.len() > MAX_BLOB_SIZE {
            return Err(StoreError::TooLarge {
                size: blob.len(),
                max: MAX_BLOB_SIZE,
            });
        }
        blob.check()
            .map_err(|e| StoreError::BadHash(e.to_string()))?;

        match self.packs.put(&blob.hash, &blob.data)? {
            PutOutcome::AlreadyExists => {
                debug!(hash = %blob.hash, "blob already stored");
                return Ok(());
            }
            PutOutcome::Written => {}
        }

        if let Some(sink) = &self.sink {
            sink.enqueue(&blob.hash).map_err(|e| match e {
                SinkError::QueueFull => StoreError::QueueFull,
                SinkError::Backend(reason) => StoreError::Replication(reason),
            })?;
        }

        self.hub.publish(ctx, EventKind::NewBlob, blob)?;

        debug!(hash = %blob.hash, "blob stored");
        Ok(())
    }

    /// Fetch a blob's bytes.
    pub fn get(&self, ctx: &Context, hash: &BlobRef) -> StoreResult<Vec<u8>> {
        info!(hash = %hash, ns = ctx.namespace().unwrap_or(""), "op get");
        match self.packs.get(hash) {
            Ok(data) => Ok(data),
            Err(PackError::NotFound(h)) => Err(StoreError::NotFound(h)),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns `true` if the blob is stored locally.
    pub fn stat(&self, ctx: &Context, hash: &BlobRef) -> StoreResult<bool> {
        debug!(hash = %hash, ns = ctx.namespace().unwrap_or(""), "op stat");
        Ok(self.packs.exists(hash)?)
    }

    /// List `(hash, size)` for blobs with `start <= hash < end`, ascending,
    /// at most `limit` entries (`0` = unbounded). Checks the context
    /// between blobs.
    pub fn enumerate(
        &self,
        ctx: &Context,
        start: &BlobRef,
        end: &BlobRef,
        limit: usize,
    ) -> StoreResult<Vec<SizedBlobRef>> {
        info!(
            start = %start,
            end = %end,
            limit,
            ns = ctx.namespace().unwrap_or(""),
            "op enumerate"
        );
        let mut refs = Vec::new();
        for entry in self.packs.enumerate(start, end, limit) {
            ctx.check().map_err(|_| StoreError::Canceled)?;
            refs.push(entry?);
        }
        Ok(refs)
    }

    /// Walk every blob in hash order and publish a `ScanBlob` event for
    /// each. Used to re-run subscribers over the whole store (e.g. to
    /// rebuild a derived index). Stops at the first subscriber error or on
    /// cancellation; partial progress is not rolled back.
    pub fn scan(&self, ctx: &Context) -> StoreResult<()> {
        info!(ns = ctx.namespace().unwrap_or(""), "op scan");
        let mut visited = 0usize;
        for entry in self.packs.enumerate(
            &BlobRef::from_hash([0u8; 32]),
            &BlobRef::from_hash([0xFF; 32]),
            0,
        ) {
            ctx.check().map_err(|_| StoreError::Canceled)?;
            let entry = entry?;
            let data = self.packs.get(&entry.hash)?;
            let blob = Blob::new(entry.hash, data);
            self.hub.publish(ctx, EventKind::ScanBlob, &blob)?;
            visited += 1;
        }
        info!(visited, "scan complete");
        Ok(())
    }

    /// Number of blobs stored locally.
    pub fn len(&self) -> usize {
        self.packs.len()
    }

    /// Returns `true` if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("blobs", &self.packs.len())
            .field("replication", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn temp_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(
            StoreConfig::new(dir.path()),
            Arc::new(Hub::new()),
        )
        .unwrap();
        (dir, store)
    }

    struct RecordingSink {
        enqueued: Mutex<Vec<BlobRef>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                enqueued: Mutex::new(Vec::new()),
            })
        }
    }

    impl ReplicationSink for RecordingSink {
        fn enqueue(&self, hash: &BlobRef) -> Result<(), SinkError> {
            self.enqueued.lock().unwrap().push(*hash);
            Ok(())
        }
    }

    struct FullSink;

    impl ReplicationSink for FullSink {
        fn enqueue(&self, _hash: &BlobRef) -> Result<(), SinkError> {
            Err(SinkError::QueueFull)
        }
    }

    #[test]
    fn put_get_stat_roundtrip() {
        let (_dir, store) = temp_store();
        let ctx = Context::background();
        let blob = Blob::from_data(b"facade blob".to_vec());

        store.put(&ctx, &blob).unwrap();
        assert!(store.stat(&ctx, &blob.hash).unwrap());
        assert_eq!(store.get(&ctx, &blob.hash).unwrap(), blob.data);
    }

    #[test]
    fn empty_blob_roundtrip() {
        let (_dir, store) = temp_store();
        let ctx = Context::background();
        let blob = Blob::from_data(Vec::new());

        store.put(&ctx, &blob).unwrap();
        assert!(store.stat(&ctx, &blob.hash).unwrap());
        assert_eq!(store.get(&ctx, &blob.hash).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn bad_hash_is_rejected() {
        let (_dir, store) = temp_store();
        let ctx = Context::background();
        let blob = Blob::new(BlobRef::from_data(b"claimed"), b"actual".to_vec());

        assert!(matches!(
            store.put(&ctx, &blob).unwrap_err(),
            StoreError::BadHash(_)
        ));
        assert!(!store.stat(&ctx, &blob.hash).unwrap());
    }

    #[test]
    fn oversized_blob_is_rejected() {
        let (_dir, store) = temp_store();
        let ctx = Context::background();
        let blob = Blob::new(
            BlobRef::from_hash([1u8; 32]),
            vec![0u8; MAX_BLOB_SIZE + 1],
        );
        assert!(matches!(
            store.put(&ctx, &blob).unwrap_err(),
            StoreError::TooLarge { .. }
        ));
    }

    #[test]
    fn get_missing_blob() {
        let (_dir, store) = temp_store();
        let ctx = Context::background();
        let hash = BlobRef::from_data(b"absent");
        assert!(matches!(
            store.get(&ctx, &hash).unwrap_err(),
            StoreError::NotFound(h) if h == hash
        ));
        assert!(!store.stat(&ctx, &hash).unwrap());
    }

    #[test]
    fn double_put_publishes_and_enqueues_once() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(Hub::new());
        let published = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&published);
        hub.subscribe(
            EventKind::NewBlob,
            "counter",
            Box::new(move |_, _| {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let sink = RecordingSink::new();
        let store = BlobStore::open(StoreConfig::new(dir.path()), hub)
            .unwrap()
            .with_replication(Arc::clone(&sink) as Arc<dyn ReplicationSink>);

        let ctx = Context::background();
        let blob = Blob::from_data(b"put me twice".to_vec());
        store.put(&ctx, &blob).unwrap();
        store.put(&ctx, &blob).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert_eq!(sink.enqueued.lock().unwrap().as_slice(), &[blob.hash]);
    }

    #[test]
    fn one_mib_blob_reput_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::new();
        let store = BlobStore::open(StoreConfig::new(dir.path()), Arc::new(Hub::new()))
            .unwrap()
            .with_replication(Arc::clone(&sink) as Arc<dyn ReplicationSink>);

        let ctx = Context::background();
        let data: Vec<u8> = (0..(1usize << 20)).map(|i| (i * 31 + 7) as u8).collect();
        let blob = Blob::from_data(data);

        store.put(&ctx, &blob).unwrap();
        store.put(&ctx, &blob).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&ctx, &blob.hash).unwrap(), blob.data);
        // At most one replication enqueue for the pair of puts.
        assert_eq!(sink.enqueued.lock().unwrap().len(), 1);
    }

    #[test]
    fn subscriber_failure_fails_put_but_blob_remains() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(Hub::new());
        hub.subscribe(
            EventKind::NewBlob,
            "rejector",
            Box::new(|_, _| Err("downstream index failed".into())),
        );

        let store = BlobStore::open(StoreConfig::new(dir.path()), hub).unwrap();
        let ctx = Context::background();
        let blob = Blob::from_data(b"half accepted".to_vec());

        assert!(matches!(
            store.put(&ctx, &blob).unwrap_err(),
            StoreError::Subscriber(_)
        ));
        // Documented behavior: the local write is not rolled back.
        assert!(store.stat(&ctx, &blob.hash).unwrap());
    }

    #[test]
    fn queue_full_fails_put_but_blob_remains() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(StoreConfig::new(dir.path()), Arc::new(Hub::new()))
            .unwrap()
            .with_replication(Arc::new(FullSink));
        let ctx = Context::background();
        let blob = Blob::from_data(b"backpressured".to_vec());

        assert!(matches!(
            store.put(&ctx, &blob).unwrap_err(),
            StoreError::QueueFull
        ));
        assert!(store.stat(&ctx, &blob.hash).unwrap());
    }

    #[test]
    fn enumerate_is_ordered() {
        let (_dir, store) = temp_store();
        let ctx = Context::background();
        let mut hashes: Vec<BlobRef> = (0..25u32)
            .map(|i| {
                let blob = Blob::from_data(format!("enum-{i}").into_bytes());
                store.put(&ctx, &blob).unwrap();
                blob.hash
            })
            .collect();
        hashes.sort();

        let refs = store
            .enumerate(
                &ctx,
                &BlobRef::from_hash([0; 32]),
                &BlobRef::from_hash([0xFF; 32]),
                0,
            )
            .unwrap();
        let scanned: Vec<BlobRef> = refs.iter().map(|r| r.hash).collect();
        assert_eq!(scanned, hashes);
    }

    #[test]
    fn scan_publishes_every_blob_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(Hub::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        hub.subscribe(
            EventKind::ScanBlob,
            "collector",
            Box::new(move |_, blob| {
                // Scan delivers the full payload, hash-verified upstream.
                assert_eq!(BlobRef::from_data(&blob.data), blob.hash);
                s.lock().unwrap().push(blob.hash);
                Ok(())
            }),
        );

        let store = BlobStore::open(StoreConfig::new(dir.path()), hub).unwrap();
        let ctx = Context::background();
        let mut hashes: Vec<BlobRef> = (0..10u32)
            .map(|i| {
                let blob = Blob::from_data(format!("scan-{i}").into_bytes());
                store.put(&ctx, &blob).unwrap();
                blob.hash
            })
            .collect();
        hashes.sort();

        store.scan(&ctx).unwrap();
        assert_eq!(*seen.lock().unwrap(), hashes);
    }

    #[test]
    fn scan_stops_on_subscriber_error() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(Hub::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        hub.subscribe(
            EventKind::ScanBlob,
            "bounded",
            Box::new(move |_, _| {
                if c.fetch_add(1, Ordering::SeqCst) == 2 {
                    return Err("enough".into());
                }
                Ok(())
            }),
        );

        let store = BlobStore::open(StoreConfig::new(dir.path()), hub).unwrap();
        let ctx = Context::background();
        for i in 0..10u32 {
            store
                .put(&ctx, &Blob::from_data(format!("stop-{i}").into_bytes()))
                .unwrap();
        }

        assert!(matches!(
            store.scan(&ctx).unwrap_err(),
            StoreError::Subscriber(_)
        ));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn scan_honors_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(Hub::new());
        let ctx = Context::background();
        let cancel_ctx = ctx.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        hub.subscribe(
            EventKind::ScanBlob,
            "canceler",
            Box::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                cancel_ctx.cancel();
                Ok(())
            }),
        );

        let store = BlobStore::open(StoreConfig::new(dir.path()), hub).unwrap();
        for i in 0..10u32 {
            store
                .put(
                    &Context::background(),
                    &Blob::from_data(format!("cancel-{i}").into_bytes()),
                )
                .unwrap();
        }

        assert!(matches!(
            store.scan(&ctx).unwrap_err(),
            StoreError::Canceled
        ));
        // The cancel lands between blobs: exactly one was visited.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use cask_chunk::{ChunkStream, ChunkerParams};
use cask_crypto::HashingReader;
use cask_store::BlobStore;
use cask_types::{Blob, BlobRef, Context};

use crate::error::{TreeError, TreeResult};
use crate::node::{RawNode, Scalar, FULL_HASH_KEY};

/// Encodes files and directory trees into deduplicated blobs plus
/// metadata nodes.
///
/// Every chunk and node write is stat-first: re-ingesting unchanged
/// content performs only existence checks and no blob writes.
pub struct TreeWriter {
    store: Arc<BlobStore>,
    params: ChunkerParams,
}

impl TreeWriter {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            params: ChunkerParams::default(),
        }
    }

    /// Override chunking parameters (tests use small chunks).
    pub fn with_chunker_params(mut self, params: ChunkerParams) -> Self {
        self.params = params;
        self
    }

    /// Ingest a single file and return its node, hash set.
    pub fn put_file(&self, ctx: &Context, path: &Path) -> TreeResult<RawNode> {
        let name = basename(path);
        debug!(path = %path.display(), "put file");

        let file = File::open(path)?;
        let mut node = RawNode::new_file(name);
        self.write_reader(ctx, file, &mut node)?;
        self.put_node(ctx, &mut node)?;
        Ok(node)
    }

    /// Ingest an arbitrary byte stream under `name`, merging in
    /// caller-provided metadata.
    pub fn put_reader(
        &self,
        ctx: &Context,
        name: &str,
        reader: impl Read,
        data: Option<BTreeMap<String, Scalar>>,
    ) -> TreeResult<RawNode> {
        let mut node = RawNode::new_file(basename(Path::new(name)));
        if let Some(data) = data {
            for (k, v) in data {
                node.add_data(k, v);
            }
        }
        self.write_reader(ctx, reader, &mut node)?;
        self.put_node(ctx, &mut node)?;
        Ok(node)
    }

    /// Recursively ingest a directory. Children are visited in name order
    /// so an unchanged tree always produces the same root hash.
    pub fn put_dir(&self, ctx: &Context, path: &Path) -> TreeResult<RawNode> {
        debug!(path = %path.display(), "put dir");
        let mut entries: Vec<std::fs::DirEntry> =
            std::fs::read_dir(path)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        let mut node = RawNode::new_dir(basename(path));
        for entry in entries {
            ctx.check().map_err(|_| TreeError::Canceled)?;
            let child_path = entry.path();
            let child = if entry.file_type()?.is_dir() {
                self.put_dir(ctx, &child_path)?
            } else {
                self.put_file(ctx, &child_path)?
            };
            let child_hash = child.hash.expect("stored node always has a hash");
            node.add_child_ref(&child_hash);
            node.size += child.size;
        }

        self.put_node(ctx, &mut node)?;
        info!(
            path = %path.display(),
            children = node.refs.len(),
            hash = %node.hash.expect("just set"),
            "dir stored"
        );
        Ok(node)
    }

    /// Chunk `reader` into the store, teeing the bytes through a running
    /// content hash, and fill the node's refs, size and full digest.
    fn write_reader(
        &self,
        ctx: &Context,
        reader: impl Read,
        node: &mut RawNode,
    ) -> TreeResult<()> {
        let mut hashing = HashingReader::new(reader);
        let mut size = 0u64;

        for chunk in ChunkStream::with_params(&mut hashing, self.params) {
            let chunk = chunk?;
            let chunk_hash = BlobRef::from_data(&chunk.data);
            size += chunk.len() as u64;

            if !self.store.stat(ctx, &chunk_hash)? {
                self.store.put(ctx, &Blob::new(chunk_hash, chunk.data))?;
            }
            node.add_indexed_ref(size, &chunk_hash);
        }

        node.size = size;
        node.add_data(FULL_HASH_KEY, Scalar::Str(hashing.finalize().to_hex()));
        Ok(())
    }

    /// Encode a node, store it if absent, and set its hash.
    fn put_node(&self, ctx: &Context, node: &mut RawNode) -> TreeResult<()> {
        let (hash, bytes) = node.encode()?;
        if !self.store.stat(ctx, &hash)? {
            self.store.put(ctx, &Blob::new(hash, bytes))?;
        }
        node.hash = Some(hash);
        Ok(())
    }
}

impl std::fmt::Debug for TreeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWriter").finish_non_exhaustive()
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

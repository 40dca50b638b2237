use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use cask_crypto::FullHasher;
use cask_store::BlobStore;
use cask_types::{BlobRef, Context};

use crate::error::{TreeError, TreeResult};
use crate::node::RawNode;

/// Materializes trees back out of the blob store.
///
/// The restore path is symmetric to the writer: fetch the node, then for a
/// file concatenate its chunks in offset order, for a directory recurse
/// into children. Reconstructed file content is verified against the
/// digest recorded in the node.
pub struct TreeReader {
    store: Arc<BlobStore>,
}

impl TreeReader {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self { store }
    }

    /// Fetch and decode a node.
    pub fn node(&self, ctx: &Context, hash: &BlobRef) -> TreeResult<RawNode> {
        let bytes = self.store.get(ctx, hash)?;
        RawNode::decode(*hash, &bytes)
    }

    /// Reassemble a file node's content in memory.
    pub fn read_file(&self, ctx: &Context, node: &RawNode) -> TreeResult<Vec<u8>> {
        if !node.is_file() {
            return Err(corrupt(node, "expected a file node"));
        }

        let mut out = Vec::with_capacity(node.size as usize);
        let mut hasher = FullHasher::new();
        for r in &node.refs {
            ctx.check().map_err(|_| TreeError::Canceled)?;
            let chunk = self.store.get(ctx, &r.hash()?)?;
            hasher.update(&chunk);
            out.extend_from_slice(&chunk);
            if out.len() as u64 != r.offset() {
                return Err(corrupt(node, "chunk offsets do not line up"));
            }
        }

        self.verify(node, out.len() as u64, hasher)?;
        Ok(out)
    }

    /// Restore a node (file or directory) beneath `dest`.
    pub fn restore(&self, ctx: &Context, hash: &BlobRef, dest: &Path) -> TreeResult<()> {
        let node = self.node(ctx, hash)?;
        if node.is_dir() {
            self.restore_dir(ctx, &node, dest)
        } else {
            self.restore_file(ctx, &node, dest)
        }
    }

    /// Stream a file node's chunks to `dest`, verifying the digest.
    pub fn restore_file(&self, ctx: &Context, node: &RawNode, dest: &Path) -> TreeResult<()> {
        if !node.is_file() {
            return Err(corrupt(node, "expected a file node"));
        }
        debug!(name = %node.name, dest = %dest.display(), "restore file");

        let mut file = File::create(dest)?;
        let mut written = 0u64;
        let mut hasher = FullHasher::new();
        for r in &node.refs {
            ctx.check().map_err(|_| TreeError::Canceled)?;
            let chunk = self.store.get(ctx, &r.hash()?)?;
            hasher.update(&chunk);
            file.write_all(&chunk)?;
            written += chunk.len() as u64;
            if written != r.offset() {
                return Err(corrupt(node, "chunk offsets do not line up"));
            }
        }
        file.sync_all()?;

        self.verify(node, written, hasher)
    }

    /// Recursively restore a directory node into `dest` (created fresh).
    pub fn restore_dir(&self, ctx: &Context, node: &RawNode, dest: &Path) -> TreeResult<()> {
        if !node.is_dir() {
            return Err(corrupt(node, "expected a dir node"));
        }
        std::fs::create_dir(dest)?;
        debug!(name = %node.name, dest = %dest.display(), "restore dir");

        for r in &node.refs {
            ctx.check().map_err(|_| TreeError::Canceled)?;
            let child = self.node(ctx, &r.hash()?)?;
            let child_dest = dest.join(&child.name);
            if child.is_dir() {
                self.restore_dir(ctx, &child, &child_dest)?;
            } else {
                self.restore_file(ctx, &child, &child_dest)?;
            }
        }

        info!(name = %node.name, children = node.refs.len(), "dir restored");
        Ok(())
    }

    fn verify(&self, node: &RawNode, size: u64, hasher: FullHasher) -> TreeResult<()> {
        if size != node.size {
            return Err(corrupt(
                node,
                &format!("reassembled {size} bytes, node says {}", node.size),
            ));
        }
        let digest = hasher.finalize().to_hex();
        match node.full_hash() {
            Some(expected) if expected != digest => Err(corrupt(
                node,
                &format!("content digest {digest} does not match recorded {expected}"),
            )),
            Some(_) => Ok(()),
            None => Err(corrupt(node, "node records no content digest")),
        }
    }
}

impl std::fmt::Debug for TreeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeReader").finish_non_exhaustive()
    }
}

fn corrupt(node: &RawNode, reason: &str) -> TreeError {
    TreeError::CorruptNode {
        hash: node
            .hash
            .map(|h| h.to_hex())
            .unwrap_or_else(|| "<unencoded>".into()),
        reason: reason.to_string(),
    }
}

//! Tree ingestion for the cask blob store.
//!
//! Decomposes files and directory trees into content-defined chunks plus
//! canonical-JSON metadata nodes ([`RawNode`]), all stored as ordinary
//! blobs. A node's identity is the hash of its encoding, so unchanged
//! files and subtrees deduplicate to pure existence checks.
//!
//! [`TreeWriter`] is the ingest path; [`TreeReader`] is the symmetric
//! restore path, verifying reconstructed content against the digest
//! recorded in each file node.

pub mod error;
pub mod node;
pub mod reader;
pub mod writer;

pub use error::{TreeError, TreeResult};
pub use node::{NodeKind, NodeRef, RawNode, Scalar, FULL_HASH_KEY};
pub use reader::TreeReader;
pub use writer::TreeWriter;

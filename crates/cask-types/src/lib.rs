//! Shared types for the cask blob store.
//!
//! Defines the content-addressed [`BlobRef`], the [`Blob`] payload pair,
//! and the [`Context`] carried through every long-running operation for
//! cancellation and namespace tagging.

pub mod blob;
pub mod context;
pub mod error;

pub use blob::{Blob, BlobRef, SizedBlobRef, MAX_BLOB_SIZE};
pub use context::Context;
pub use error::TypeError;

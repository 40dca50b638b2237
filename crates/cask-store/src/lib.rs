//! Blob store facade for cask.
//!
//! Composes the pack storage engine, the event hub, and (optionally) the
//! replication queue into the service other subsystems talk to:
//! verified idempotent `put`, `get`, `stat`, ordered `enumerate`, and a
//! full `scan` that replays every blob through subscribers.

pub mod error;
pub mod sink;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use sink::{ReplicationSink, SinkError};
pub use store::{BlobStore, StoreConfig};

//! Asynchronous S3 replication for the cask blob store.
//!
//! Every blob accepted locally is enqueued into a durable FIFO and
//! uploaded to a remote bucket by a background worker, exactly once per
//! content hash under normal operation and at-least-once across crashes
//! (duplicate uploads are idempotent because the object key is the hash).
//!
//! # Architecture
//!
//! - **queue**: sled-backed durable FIFO, `seq:u64_be` keys
//! - **remote**: the [`RemoteStore`] trait, an in-memory mock, and
//!   (feature `s3`) an AWS S3 client
//! - **worker**: [`Replicator`], the background drain loop with
//!   exponential backoff, plus the `scan` and `restore` repair operations
//!
//! Payloads are optionally sealed with XChaCha20-Poly1305 before upload
//! when a 32-byte key file is configured.

pub mod config;
pub mod error;
pub mod queue;
pub mod remote;
#[cfg(feature = "s3")]
pub mod s3;
pub mod worker;

pub use config::{BackoffConfig, ReplicationConfig, WorkerConfig};
pub use error::{ReplError, ReplResult};
pub use queue::{EntryState, QueueEntry, ReplicationQueue};
pub use remote::{InMemoryRemoteStore, RemoteError, RemoteResult, RemoteStore};
#[cfg(feature = "s3")]
pub use s3::S3RemoteStore;
pub use worker::{Replicator, WorkerHandle};

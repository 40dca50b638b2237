//! Cryptographic primitives for the cask blob store.
//!
//! Provides BLAKE2b-256 content hashing (one-shot and streaming) and the
//! XChaCha20-Poly1305 sealed box used to encrypt replication payloads.
//!
//! Both wrap established libraries; no custom cryptography.

pub mod hasher;
pub mod sealed;

pub use hasher::{FullHasher, HashingReader};
pub use sealed::{SealError, SealedBox, KEY_SIZE, MAC_SIZE, NONCE_SIZE};

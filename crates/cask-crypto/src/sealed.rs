use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, XChaCha20Poly1305, XNonce};

/// Key size for the sealed box (32 bytes, the replication `key_file` length).
pub const KEY_SIZE: usize = 32;

/// XChaCha20 nonce size (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size (16 bytes).
pub const MAC_SIZE: usize = 16;

/// Errors from sealing or opening replication payloads.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SealError {
    #[error("sealed payload too short: {0} bytes")]
    TooShort(usize),

    #[error("decryption failed: bad key or tampered payload")]
    BadSeal,

    #[error("encryption failed")]
    SealFailed,
}

/// XChaCha20-Poly1305 sealed box keyed by the 32-byte replication key file.
///
/// Wire layout: `nonce(24) || ciphertext || mac(16)`. The nonce is random
/// per seal; the remote object carries the whole sealed payload.
pub struct SealedBox {
    cipher: XChaCha20Poly1305,
}

impl SealedBox {
    /// Build a box from raw key material.
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Encrypt a payload, prepending the random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| SealError::SealFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a sealed payload produced by [`SealedBox::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
        if sealed.len() < NONCE_SIZE + MAC_SIZE {
            return Err(SealError::TooShort(sealed.len()));
        }
        let nonce = XNonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &sealed[NONCE_SIZE..])
            .map_err(|_| SealError::BadSeal)
    }
}

impl std::fmt::Debug for SealedBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material.
        f.write_str("SealedBox([REDACTED])")
    }
}

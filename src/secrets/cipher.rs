//! Symmetric authenticated encryption for sensitive event fields.
//!
//! XChaCha20-Poly1305 with a 256-bit key and a random 192-bit nonce per
//! message. The key never leaves this type except through `export`, whose
//! buffer is zeroized when dropped.

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Key length in bytes (256-bit).
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (XChaCha20 extended nonce).
pub const NONCE_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key material: expected 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("invalid nonce: expected 24 bytes, got {0}")]
    NonceLength(usize),
    #[error("random number generator failed: {0}")]
    Rng(String),
    #[error("encryption failed")]
    Encryption,
    #[error("authentication failed (tampered ciphertext or wrong key)")]
    Authentication,
}

/// Output of [`EncryptionKey::seal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

/// The store's symmetric key
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Generate a fresh key from the OS CSPRNG
    pub fn generate() -> Result<Self, CipherError> {
        let mut key = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CipherError::Rng(e.to_string()))?;
        Ok(Self(key))
    }

    /// Raw key bytes for persistence
    pub fn export(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.0.to_vec())
    }

    /// Rebuild a key from exported bytes
    pub fn import(material: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; KEY_LEN] = material
            .try_into()
            .map_err(|_| CipherError::KeyLength(material.len()))?;
        Ok(Self(key))
    }

    fn aead(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    /// Encrypt `plaintext`, binding `aad` into the authentication tag
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CipherError::Rng(e.to_string()))?;

        let ciphertext = self
            .aead()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CipherError::Encryption)?;

        Ok(Sealed { ciphertext, nonce })
    }

    /// Decrypt and authenticate
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        if nonce.len() != NONCE_LEN {
            return Err(CipherError::NonceLength(nonce.len()));
        }

        self.aead()
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CipherError::Authentication)
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

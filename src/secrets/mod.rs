//! Key management for the encrypted event store
//!
//! One symmetric key protects every event. Its raw export lives in a
//! separate keystore database and is cached in memory after first use.
//!
//! ```text
//! keystore.db ── load ──► EncryptionKey (cached, Arc)
//!      ▲                         │
//!      └── store (first run) ◄───┘ seal/open event payloads
//! ```
//!
//! # Example
//!
//! ```no_run
//! use eventsphere::secrets::{KeyManager, KeyStore};
//!
//! let manager = KeyManager::new(KeyStore::open("keystore.db")?);
//! let key = manager.get_or_create_key()?;
//! let sealed = key.seal(b"{}", b"evt-1")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod cipher;
mod keystore;

pub use self::cipher::{CipherError, EncryptionKey, Sealed, KEY_LEN, NONCE_LEN};
pub use self::keystore::KeyStore;

use crate::db::RecreateError;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Keystore entry holding the event encryption key
pub const EVENT_KEY_NAME: &str = "event-encryption-key";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keystore failure during {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to rebuild damaged keystore: {0}")]
    Recreate(#[from] RecreateError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Owns the keystore and the lazily loaded key
#[derive(Debug)]
pub struct KeyManager {
    keystore: KeyStore,
    cached: Mutex<Option<Arc<EncryptionKey>>>,
}

impl KeyManager {
    pub fn new(keystore: KeyStore) -> Self {
        Self {
            keystore,
            cached: Mutex::new(None),
        }
    }

    /// Return the store key, loading or generating it on first call.
    ///
    /// A missing or unreadable export is replaced by a freshly generated
    /// key. Records sealed under the old key can no longer be opened.
    pub fn get_or_create_key(&self) -> Result<Arc<EncryptionKey>, KeyError> {
        let mut cached = self.cached.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(Arc::clone(key));
        }

        let key = match self.load_existing() {
            Some(key) => key,
            None => {
                let key = EncryptionKey::generate()?;
                self.keystore.store(EVENT_KEY_NAME, &key.export())?;
                tracing::debug!("generated new event encryption key");
                key
            }
        };

        let key = Arc::new(key);
        *cached = Some(Arc::clone(&key));
        Ok(key)
    }

    fn load_existing(&self) -> Option<EncryptionKey> {
        let material = match self.keystore.load(EVENT_KEY_NAME) {
            Ok(Some(material)) => material,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "could not read encryption key, generating a new one");
                return None;
            }
        };

        match EncryptionKey::import(&material) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "stored encryption key is unusable, generating a new one");
                None
            }
        }
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }
}

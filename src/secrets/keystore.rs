//! Key-value persistence for exported key material (`keystore.db`).
//!
//! Lives in its own database file so that throwing away a corrupted event
//! database never takes the key with it.

use super::KeyError;
use crate::db::{remove_database_files, RecreateError, SqliteDatabase};
use crate::storage::error::is_corruption;
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use std::path::Path;
use zeroize::Zeroizing;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS keys (
        name TEXT PRIMARY KEY,
        material BLOB NOT NULL
    );
";

/// SQLite-backed store of named key exports
#[derive(Debug)]
pub struct KeyStore {
    db: Mutex<SqliteDatabase>,
}

impl KeyStore {
    /// Open or create a keystore file.
    ///
    /// A file SQLite cannot read is deleted and replaced by an empty
    /// keystore; the key manager then generates a fresh key.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KeyError> {
        let path = path.as_ref();
        match Self::open_file(path) {
            Err(KeyError::Storage { op, source }) if is_corruption(&source) => {
                tracing::warn!(
                    path = %path.display(),
                    op,
                    error = %source,
                    "keystore unreadable, recreating"
                );
                remove_database_files(path).map_err(RecreateError::from)?;
                Self::open_file(path)
            }
            result => result,
        }
    }

    fn open_file(path: &Path) -> Result<Self, KeyError> {
        let db = SqliteDatabase::open(path).map_err(|source| KeyError::Storage {
            op: "open keystore",
            source,
        })?;
        Self::init(db)
    }

    /// In-memory keystore, gone when dropped
    pub fn open_in_memory() -> Result<Self, KeyError> {
        let db = SqliteDatabase::open_in_memory().map_err(|source| KeyError::Storage {
            op: "open keystore",
            source,
        })?;
        Self::init(db)
    }

    fn init(db: SqliteDatabase) -> Result<Self, KeyError> {
        db.connection()
            .execute_batch(SCHEMA)
            .map_err(|source| KeyError::Storage {
                op: "initialize keystore",
                source,
            })?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Load a stored export, `None` when the name is unknown
    pub fn load(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, KeyError> {
        self.db
            .lock()
            .connection()
            .query_row(
                "SELECT material FROM keys WHERE name = ?1",
                [name],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map(|material| material.map(Zeroizing::new))
            .map_err(|source| KeyError::Storage {
                op: "load key",
                source,
            })
    }

    /// Insert or overwrite an export
    pub fn store(&self, name: &str, material: &[u8]) -> Result<(), KeyError> {
        self.db
            .lock()
            .connection()
            .execute(
                "INSERT INTO keys (name, material) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET material = excluded.material",
                rusqlite::params![name, material],
            )
            .map_err(|source| KeyError::Storage {
                op: "store key",
                source,
            })?;
        Ok(())
    }

    /// Remove an export. Returns whether anything was removed.
    pub fn remove(&self, name: &str) -> Result<bool, KeyError> {
        let removed = self
            .db
            .lock()
            .connection()
            .execute("DELETE FROM keys WHERE name = ?1", [name])
            .map_err(|source| KeyError::Storage {
                op: "remove key",
                source,
            })?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_load_remove() -> anyhow::Result<()> {
        let store = KeyStore::open_in_memory()?;
        assert!(store.load("missing")?.is_none());

        store.store("k", &[1, 2, 3])?;
        assert_eq!(store.load("k")?.as_deref(), Some(&vec![1u8, 2, 3]));

        store.store("k", &[9])?;
        assert_eq!(store.load("k")?.as_deref(), Some(&vec![9u8]));

        assert!(store.remove("k")?);
        assert!(!store.remove("k")?);
        assert!(store.load("k")?.is_none());
        Ok(())
    }

    #[test]
    fn test_survives_reopen() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("keystore.db");

        KeyStore::open(&path)?.store("k", &[7; 32])?;
        let reopened = KeyStore::open(&path)?;
        assert_eq!(reopened.load("k")?.map(|m| m.len()), Some(32));
        Ok(())
    }

    #[test]
    fn test_unreadable_file_is_replaced() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("keystore.db");
        std::fs::write(&path, vec![0x42u8; 4096])?;

        let store = KeyStore::open(&path)?;
        assert!(store.load("k")?.is_none());
        store.store("k", &[1])?;
        assert_eq!(store.load("k")?.as_deref(), Some(&vec![1u8]));
        Ok(())
    }
}

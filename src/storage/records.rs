//! On-disk event layout
//!
//! Position and time stay in plaintext columns so they can be indexed and
//! range-filtered. Title and category travel as one sealed JSON payload
//! bound to the event id.

use super::error::{SqlResultExt, StoreError};
use super::types::{Category, Event};
use crate::secrets::EncryptionKey;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};

/// Columns selected by every read, in `from_row` order
pub(crate) const COLUMNS: &str = "id, timestamp, latitude, longitude, encrypted_data, iv";

/// Plaintext of the sealed payload
#[derive(Debug, Serialize, Deserialize)]
struct SensitiveFields {
    title: String,
    category: Category,
}

/// One row of the `events` table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub encrypted_data: Option<Vec<u8>>,
    pub iv: Option<Vec<u8>>,
}

impl StoredRecord {
    /// Split an event and seal its sensitive half under a fresh nonce
    pub fn seal(event: &Event, key: &EncryptionKey) -> Result<Self, StoreError> {
        let payload = serde_json::to_vec(&SensitiveFields {
            title: event.title.clone(),
            category: event.category,
        })?;

        let sealed = key
            .seal(&payload, event.id.as_bytes())
            .map_err(|e| StoreError::Crypto {
                id: event.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            id: event.id.clone(),
            timestamp: event.timestamp,
            latitude: event.latitude,
            longitude: event.longitude,
            encrypted_data: Some(sealed.ciphertext),
            iv: Some(sealed.nonce.to_vec()),
        })
    }

    /// Decrypt and reassemble the event
    pub fn open(&self, key: &EncryptionKey) -> Result<Event, StoreError> {
        let (Some(ciphertext), Some(iv)) = (&self.encrypted_data, &self.iv) else {
            return Err(self.crypto_error("record is incomplete"));
        };

        let plaintext = key
            .open(ciphertext, iv, self.id.as_bytes())
            .map_err(|e| self.crypto_error(e))?;

        let fields: SensitiveFields =
            serde_json::from_slice(&plaintext).map_err(|e| self.crypto_error(e))?;

        Ok(Event {
            id: self.id.clone(),
            title: fields.title,
            category: fields.category,
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: self.timestamp,
        })
    }

    fn crypto_error(&self, reason: impl ToString) -> StoreError {
        StoreError::Crypto {
            id: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            encrypted_data: row.get(4)?,
            iv: row.get(5)?,
        })
    }

    pub(crate) fn insert(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.prepare_cached(
            "INSERT INTO events (id, timestamp, latitude, longitude, encrypted_data, iv)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .and_then(|mut stmt| {
            stmt.execute(params![
                self.id,
                self.timestamp,
                self.latitude,
                self.longitude,
                self.encrypted_data,
                self.iv,
            ])
        })
        .during("insert event")?;
        Ok(())
    }

    pub(crate) fn replace(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "UPDATE events
             SET timestamp = ?2, latitude = ?3, longitude = ?4, encrypted_data = ?5, iv = ?6
             WHERE id = ?1",
            params![
                self.id,
                self.timestamp,
                self.latitude,
                self.longitude,
                self.encrypted_data,
                self.iv,
            ],
        )
        .during("update event")?;
        Ok(())
    }

    pub(crate) fn fetch(conn: &Connection, id: &str) -> Result<Option<Self>, StoreError> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM events WHERE id = ?1"),
            [id],
            Self::from_row,
        )
        .optional()
        .during("read event")
    }

    /// Rows matching `filter` (an SQL condition, may be empty), newest first
    pub(crate) fn fetch_where(
        conn: &Connection,
        filter: &str,
        args: &[&dyn ToSql],
    ) -> Result<Vec<Self>, StoreError> {
        let condition = if filter.is_empty() {
            String::new()
        } else {
            format!("WHERE {filter}")
        };
        let sql = format!("SELECT {COLUMNS} FROM events {condition} ORDER BY timestamp DESC, id ASC");

        let mut stmt = conn.prepare(&sql).during("list events")?;
        let rows = stmt
            .query_map(args, Self::from_row)
            .during("list events")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during("list events")?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            id: "evt-1".to_string(),
            title: "Earthquake".to_string(),
            category: Category::NaturalDisaster,
            latitude: 35.0,
            longitude: 139.0,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_seal_keeps_plaintext_columns() {
        let key = EncryptionKey::generate().unwrap();
        let record = StoredRecord::seal(&sample(), &key).unwrap();

        assert_eq!(record.id, "evt-1");
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.iv.as_ref().map(Vec::len), Some(24));

        let ciphertext = record.encrypted_data.clone().unwrap();
        assert!(!String::from_utf8_lossy(&ciphertext).contains("Earthquake"));

        assert_eq!(record.open(&key).unwrap(), sample());
    }

    #[test]
    fn test_incomplete_record_is_crypto_error() {
        let key = EncryptionKey::generate().unwrap();
        let mut record = StoredRecord::seal(&sample(), &key).unwrap();
        record.iv = None;

        assert!(matches!(record.open(&key), Err(StoreError::Crypto { .. })));
    }

    #[test]
    fn test_payload_bound_to_id() {
        let key = EncryptionKey::generate().unwrap();
        let mut record = StoredRecord::seal(&sample(), &key).unwrap();
        record.id = "evt-2".to_string();

        assert!(matches!(record.open(&key), Err(StoreError::Crypto { .. })));
    }
}

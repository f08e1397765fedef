//! Errors surfaced by the event store

use crate::db::RecreateError;
use crate::secrets::KeyError;
use crate::validation::ValidationError;
use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error("event not found: {0}")]
    NotFound(String),

    #[error("database corrupted during {op}: {detail}")]
    Corruption { op: &'static str, detail: String },

    #[error("cannot decrypt event {id}: {reason}")]
    Crypto { id: String, reason: String },

    #[error("storage failure during {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("could not rebuild database during {op}: {source}")]
    Recreate {
        op: &'static str,
        #[source]
        source: RecreateError,
    },

    #[error("I/O failure during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("malformed event payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("an event store is already open for {}", .0.display())]
    AlreadyOpen(PathBuf),

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },
}

impl StoreError {
    /// Whether this error came from a corrupted or missing database
    pub fn is_corruption(&self) -> bool {
        match self {
            StoreError::Corruption { .. } => true,
            StoreError::Storage { source, .. } => is_corruption(source),
            _ => false,
        }
    }
}

/// Classify a SQLite error as corruption that recreating the database fixes.
///
/// Covers damaged files, files that are not databases, a full disk, schema
/// changes underneath a prepared statement and a missing events table.
pub fn is_corruption(error: &rusqlite::Error) -> bool {
    if matches!(
        error.sqlite_error_code(),
        Some(
            ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull
                | ErrorCode::SchemaChanged
        )
    ) {
        return true;
    }

    match error {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.contains("no such table"),
        rusqlite::Error::SqlInputError { msg, .. } => msg.contains("no such table"),
        _ => false,
    }
}

/// Attach the failing operation to a raw SQLite result
pub(crate) trait SqlResultExt<T> {
    fn during(self, op: &'static str) -> Result<T, StoreError>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn during(self, op: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Storage { op, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_missing_table_is_corruption() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get::<_, i64>(0))
            .unwrap_err();
        assert!(is_corruption(&err));
        assert!(StoreError::Storage { op: "count", source: err }.is_corruption());
    }

    #[test]
    fn test_constraint_violation_is_not_corruption() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(!is_corruption(&err));
    }

    #[test]
    fn test_corrupt_codes() {
        let corrupt = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        );
        assert!(is_corruption(&corrupt));

        let full = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        );
        assert!(is_corruption(&full));

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(!is_corruption(&busy));
    }
}

//! SQLite connection wrapper shared by the event store and the keystore
//!
//! Remembers where the database lives so a corrupted file can be thrown away
//! and recreated in place.

use rusqlite::Connection;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// SQLite database handle with an optional backing file
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteDatabase {
    /// Open or create a SQLite database file
    pub fn open<P: AsRef<Path>>(path: P) -> rusqlite::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        // performance pragmas
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory database for testing
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    /// Backing file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get reference to underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get mutable reference to underlying connection (for transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Close the connection, delete the database files and open an empty
    /// database at the same location.
    ///
    /// In-memory databases are simply replaced by a fresh one.
    pub fn recreate(&mut self) -> Result<(), RecreateError> {
        let old = std::mem::replace(&mut self.conn, Connection::open_in_memory()?);

        // Close errors are irrelevant, the files are about to go away
        drop(old.close());

        if let Some(path) = &self.path {
            remove_database_files(path)?;
            self.conn = Self::open(path)?.conn;
        }
        Ok(())
    }
}

/// Failure while rebuilding a database from scratch
#[derive(Debug, thiserror::Error)]
pub enum RecreateError {
    #[error("failed to remove database files: {0}")]
    Io(#[from] io::Error),
    #[error("failed to reopen database: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Remove a database file together with its WAL and shared-memory siblings
pub fn remove_database_files(path: &Path) -> io::Result<()> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        match fs::remove_file(PathBuf::from(candidate)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_basic_operations() -> anyhow::Result<()> {
        let db = SqliteDatabase::open_in_memory()?;
        assert!(db.path().is_none());

        db.connection()
            .execute("CREATE TABLE test (id INTEGER, name TEXT)", [])?;
        let count = db
            .connection()
            .execute("INSERT INTO test VALUES (?1, ?2)", rusqlite::params![1, "test"])?;
        assert_eq!(count, 1);

        let name: String =
            db.connection()
                .query_row("SELECT name FROM test WHERE id = ?1", [1], |row| row.get(0))?;
        assert_eq!(name, "test");

        Ok(())
    }

    #[test]
    fn test_recreate_discards_file_contents() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("recreate.db");

        let mut db = SqliteDatabase::open(&path)?;
        db.connection()
            .execute_batch("CREATE TABLE doomed (id INTEGER); INSERT INTO doomed VALUES (1);")?;

        db.recreate()?;
        assert_eq!(db.path(), Some(path.as_path()));

        let tables: i64 = db.connection().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 0);

        Ok(())
    }

    #[test]
    fn test_remove_missing_files_is_ok() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        remove_database_files(&temp.path().join("never-created.db"))?;
        Ok(())
    }
}

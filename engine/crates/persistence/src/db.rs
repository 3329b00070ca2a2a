use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::config::ConfigRepo;
use crate::error::PersistenceError;
use crate::records::RecordRepo;
use crate::schema;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Main database handle wrapping a SQLite connection.
pub struct Database {
    conn: Connection,
    location: Location,
}

impl Database {
    /// Open (or create) a database at the given file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Self::connect_file(path)?;
        schema::create_tables(&conn)?;
        Ok(Self {
            conn,
            location: Location::File(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self {
            conn,
            location: Location::Memory,
        })
    }

    /// Open `path`, treating the literal `:memory:` as an in-memory database.
    pub fn open_location(path: &str) -> Result<Self, PersistenceError> {
        if path == ":memory:" {
            Self::open_memory()
        } else {
            Self::open(path)
        }
    }

    fn connect_file(path: &Path) -> Result<Connection, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(conn)
    }

    /// Drop the underlying connection and open a fresh one.
    ///
    /// In-memory databases keep their connection: reopening would discard
    /// every row.
    pub fn reconnect(&mut self) -> Result<(), PersistenceError> {
        match &self.location {
            Location::File(path) => {
                let conn = Self::connect_file(path)?;
                // Replacing drops (and closes) the old connection.
                self.conn = conn;
                tracing::info!(path = %path.display(), "Database connection re-established");
            }
            Location::Memory => {
                tracing::debug!("In-memory database keeps its connection on reconnect");
            }
        }
        Ok(())
    }

    /// File path backing this database, `None` for in-memory.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Get the server config repository.
    pub fn config(&self) -> ConfigRepo<'_> {
        ConfigRepo::new(&self.conn)
    }

    /// Get the typed record repository.
    pub fn records(&self) -> RecordRepo<'_> {
        RecordRepo::new(&self.conn)
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordTable;
    use serde_json::json;

    #[test]
    fn open_memory_creates_tables() {
        let db = Database::open_memory().unwrap();
        assert!(db.path().is_none());
        assert_eq!(db.records().count(RecordTable::Objects).unwrap(), 0);
        assert!(db.config().get("anything").unwrap().is_none());
    }

    #[test]
    fn file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("game.db");
        let mut db = Database::open(&path).unwrap();
        db.config().set("runtime", &json!(12.5)).unwrap();

        db.reconnect().unwrap();
        assert_eq!(db.config().get("runtime").unwrap(), Some(json!(12.5)));
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn memory_reconnect_keeps_rows() {
        let mut db = Database::open_memory().unwrap();
        db.config().set("k", &json!("v")).unwrap();
        db.reconnect().unwrap();
        assert_eq!(db.config().get("k").unwrap(), Some(json!("v")));
    }
}

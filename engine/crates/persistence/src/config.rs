use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::db::Database;
use crate::error::PersistenceError;

/// Row access for the `server_config` key/value table.
pub struct ConfigRepo<'a> {
    conn: &'a Connection,
}

impl<'a> ConfigRepo<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM server_config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
        let text = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO server_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, text],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool, PersistenceError> {
        let changed = self
            .conn
            .execute("DELETE FROM server_config WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }
}

/// Durable key/value store for restart bookkeeping.
///
/// This is the only state guaranteed to survive a hard kill, so every
/// reload/reset coordination value goes through it.
pub trait ConfigStore: Send {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), PersistenceError>;
    fn delete(&mut self, key: &str) -> Result<(), PersistenceError>;

    /// Drop and re-establish any underlying connection.
    fn reconnect(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Typed helpers over any [`ConfigStore`].
pub trait ConfigStoreExt: ConfigStore {
    /// `get(key, default)`: the stored value, or `default` when unset.
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, PersistenceError> {
        match self.get(key)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(default),
        }
    }

    fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(value)?;
        self.set(key, value)
    }
}

impl<S: ConfigStore + ?Sized> ConfigStoreExt for S {}

/// [`ConfigStore`] backed by the SQLite `server_config` table.
pub struct SqliteConfigStore {
    db: Database,
}

impl SqliteConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ConfigStore for SqliteConfigStore {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        self.db.config().get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.db.config().set(key, &value)
    }

    fn delete(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.db.config().delete(key).map(|_| ())
    }

    fn reconnect(&mut self) -> Result<(), PersistenceError> {
        self.db.reconnect()
    }
}

/// Process-local [`ConfigStore`]; nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryConfigStore {
    values: BTreeMap<String, Value>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.values.remove(key);
        Ok(())
    }
}

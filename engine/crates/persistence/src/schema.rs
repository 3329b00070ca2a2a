use rusqlite::Connection;

use crate::error::PersistenceError;

/// Create the config and record tables if they do not exist yet.
///
/// Record tables keep the two path columns outside the JSON body so bulk
/// rewrites can filter on them; the body carries the same values under the
/// same names.
pub fn create_tables(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS server_config (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS objects (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            typeclass_path TEXT NOT NULL,
            cmdset_storage TEXT,
            body           TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS accounts (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            typeclass_path TEXT NOT NULL,
            cmdset_storage TEXT,
            body           TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS scripts (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            typeclass_path TEXT NOT NULL,
            cmdset_storage TEXT,
            body           TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS channels (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            typeclass_path TEXT NOT NULL,
            cmdset_storage TEXT,
            body           TEXT NOT NULL DEFAULT '{}'
        );
        ",
    )?;
    Ok(())
}

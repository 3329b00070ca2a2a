pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod manager;
pub mod records;
pub mod schema;

pub use config::{ConfigStore, ConfigStoreExt, MemoryConfigStore, SqliteConfigStore};
pub use db::Database;
pub use error::PersistenceError;
pub use manager::SnapshotManager;
pub use records::{PathColumn, RecordRepo, RecordTable, StoredRecord};

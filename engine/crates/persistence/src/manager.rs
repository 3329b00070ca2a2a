use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PersistenceError;

/// Named bincode state files in one directory.
///
/// Writes go to `<name>.bin.tmp` first and are renamed into place, so a
/// crash mid-write leaves the previous file intact.
pub struct SnapshotManager {
    save_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.save_dir.join(format!("{name}.bin"))
    }

    /// Save `state` under `name`, replacing any previous file.
    pub fn save<T: Serialize>(&self, name: &str, state: &T) -> Result<PathBuf, PersistenceError> {
        std::fs::create_dir_all(&self.save_dir)?;

        let path = self.path_for(name);
        let bytes = bincode::serialize(state)?;

        let tmp_path = self.save_dir.join(format!("{name}.bin.tmp"));
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &path)?;

        tracing::info!(name, bytes = bytes.len(), path = %path.display(), "State saved");
        Ok(path)
    }

    /// Load the state stored under `name`.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, PersistenceError> {
        let path = self.path_for(name);
        let bytes = std::fs::read(&path)?;
        let state = bincode::deserialize(&bytes)?;
        tracing::info!(name, path = %path.display(), "State loaded");
        Ok(state)
    }

    /// Like [`load`](Self::load) but `None` when nothing was saved yet.
    pub fn load_if_exists<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistenceError> {
        if !self.exists(name) {
            return Ok(None);
        }
        self.load(name).map(Some)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    /// Remove the state file for `name`. Missing files are not an error.
    pub fn remove(&self, name: &str) -> Result<(), PersistenceError> {
        match std::fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

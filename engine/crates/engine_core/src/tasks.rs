use persistence::{PersistenceError, SnapshotManager};
use serde::{Deserialize, Serialize};
use world::ObjectId;

use net::RestartMode;

/// State file name under the state directory.
pub const SCHEDULER_STATE: &str = "scheduler";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerEntry {
    pub key: String,
    pub interval_secs: u64,
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedTask {
    pub id: u64,
    /// Callback path resolved by whoever re-arms the task.
    pub callback: String,
    pub due_in_secs: f64,
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub object: ObjectId,
    pub field: String,
    pub callback: String,
}

/// Tickers, delayed tasks and field monitors that outlive a process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub tickers: Vec<TickerEntry>,
    pub tasks: Vec<DelayedTask>,
    pub monitors: Vec<MonitorEntry>,
}

impl SchedulerState {
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() && self.tasks.is_empty() && self.monitors.is_empty()
    }

    /// Keep only what survives a stop in `mode`. A reload keeps everything;
    /// a cold stop keeps persistent tickers and tasks and drops monitors.
    pub fn retain_for(&mut self, mode: RestartMode) {
        if mode == RestartMode::Reload {
            return;
        }
        self.tickers.retain(|t| t.persistent);
        self.tasks.retain(|t| t.persistent);
        self.monitors.clear();
    }

    pub fn save(&self, files: &SnapshotManager, mode: RestartMode) -> Result<(), PersistenceError> {
        let mut kept = self.clone();
        kept.retain_for(mode);
        files.save(SCHEDULER_STATE, &kept)?;
        tracing::info!(
            %mode,
            tickers = kept.tickers.len(),
            tasks = kept.tasks.len(),
            monitors = kept.monitors.len(),
            "Scheduler state saved"
        );
        Ok(())
    }

    /// Load the saved state for a start in `mode`. A missing file is an
    /// empty state.
    pub fn restore(files: &SnapshotManager, mode: RestartMode) -> Result<Self, PersistenceError> {
        let mut state: SchedulerState = files.load_if_exists(SCHEDULER_STATE)?.unwrap_or_default();
        state.retain_for(mode);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SchedulerState {
        SchedulerState {
            tickers: vec![
                TickerEntry { key: "weather".into(), interval_secs: 300, persistent: true },
                TickerEntry { key: "blink".into(), interval_secs: 5, persistent: false },
            ],
            tasks: vec![DelayedTask {
                id: 7,
                callback: "game.tasks.decay".into(),
                due_in_secs: 12.5,
                persistent: false,
            }],
            monitors: vec![MonitorEntry {
                object: ObjectId(3),
                field: "hp".into(),
                callback: "game.monitors.hp".into(),
            }],
        }
    }

    #[test]
    fn reload_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let files = SnapshotManager::new(dir.path());
        sample().save(&files, RestartMode::Reload).unwrap();
        assert_eq!(SchedulerState::restore(&files, RestartMode::Reload).unwrap(), sample());
    }

    #[test]
    fn cold_stop_drops_transient_entries() {
        let dir = TempDir::new().unwrap();
        let files = SnapshotManager::new(dir.path());
        sample().save(&files, RestartMode::Shutdown).unwrap();

        let restored = SchedulerState::restore(&files, RestartMode::Reload).unwrap();
        assert_eq!(restored.tickers.len(), 1);
        assert_eq!(restored.tickers[0].key, "weather");
        assert!(restored.tasks.is_empty());
        assert!(restored.monitors.is_empty());
    }

    #[test]
    fn missing_file_restores_empty() {
        let dir = TempDir::new().unwrap();
        let files = SnapshotManager::new(dir.path());
        assert!(SchedulerState::restore(&files, RestartMode::Reset).unwrap().is_empty());
    }
}

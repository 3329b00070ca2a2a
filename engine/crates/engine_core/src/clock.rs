use persistence::keys::RUNTIME;
use persistence::{ConfigStore, ConfigStoreExt};
use tokio::time::Instant;

/// Cumulative server runtime, carried across restarts through the
/// config store.
///
/// The first [`tick`](RuntimeClock::tick) loads the stored baseline; every
/// later tick adds the measured time since the previous one, never the
/// nominal period. While the baseline cannot be read the clock counts from
/// zero and retries the load on every tick; until it succeeds
/// [`has_baseline`](RuntimeClock::has_baseline) is false and the runtime
/// must not be written back.
#[derive(Debug, Default)]
pub struct RuntimeClock {
    runtime: f64,
    last_snapshot: Option<Instant>,
    baseline_loaded: bool,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the stored runtime has been folded in.
    pub fn has_baseline(&self) -> bool {
        self.baseline_loaded
    }

    /// Advance the clock to `now` and return the new runtime in seconds.
    pub fn tick(&mut self, store: &dyn ConfigStore, now: Instant) -> f64 {
        if let Some(last) = self.last_snapshot {
            self.runtime += now.saturating_duration_since(last).as_secs_f64();
        }
        if !self.baseline_loaded {
            match store.get_or(RUNTIME, 0.0_f64) {
                Ok(stored) => {
                    self.runtime += stored;
                    self.baseline_loaded = true;
                    tracing::info!(runtime = self.runtime, "Runtime clock baseline loaded");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stored runtime unavailable, not persisting until it loads");
                }
            }
        }
        self.last_snapshot = Some(now);
        self.runtime
    }

    /// Runtime as of `now` without moving the snapshot.
    pub fn current(&self, now: Instant) -> f64 {
        match self.last_snapshot {
            Some(last) => self.runtime + now.saturating_duration_since(last).as_secs_f64(),
            None => self.runtime,
        }
    }

    /// Runtime as of the last tick.
    pub fn runtime(&self) -> f64 {
        self.runtime
    }
}

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}

/// What one maintenance tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceMetrics {
    pub tick: u64,
    pub duration_us: u128,
    /// Runtime clock value after the tick, in seconds.
    pub runtime_secs: f64,
    pub sessions: usize,
    pub idle_disconnected: usize,
    pub orphans_repaired: usize,
    pub cache_evicted: usize,
    pub reconnected: bool,
}

impl MaintenanceMetrics {
    /// A tick is expected to finish well inside this budget.
    pub const TICK_BUDGET_US: u128 = 500_000;

    pub fn is_quiet(&self) -> bool {
        self.idle_disconnected == 0
            && self.orphans_repaired == 0
            && self.cache_evicted == 0
            && !self.reconnected
    }

    pub fn log(&self) {
        if self.duration_us > Self::TICK_BUDGET_US {
            tracing::warn!(
                tick = self.tick,
                duration_us = self.duration_us,
                sessions = self.sessions,
                idle = self.idle_disconnected,
                orphans = self.orphans_repaired,
                evicted = self.cache_evicted,
                "maintenance tick exceeded budget ({}us > {}us)",
                self.duration_us,
                Self::TICK_BUDGET_US
            );
        } else if self.is_quiet() {
            tracing::debug!(
                tick = self.tick,
                duration_us = self.duration_us,
                runtime = self.runtime_secs,
                sessions = self.sessions,
                "maintenance tick completed"
            );
        } else {
            tracing::info!(
                tick = self.tick,
                duration_us = self.duration_us,
                runtime = self.runtime_secs,
                sessions = self.sessions,
                idle = self.idle_disconnected,
                orphans = self.orphans_repaired,
                evicted = self.cache_evicted,
                reconnected = self.reconnected,
                "maintenance tick completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_tick_detection() {
        let mut metrics = MaintenanceMetrics {
            tick: 3,
            sessions: 4,
            ..Default::default()
        };
        assert!(metrics.is_quiet());
        metrics.orphans_repaired = 1;
        assert!(!metrics.is_quiet());
        metrics.log();
    }

    #[test]
    fn over_budget_tick_still_logs() {
        let metrics = MaintenanceMetrics {
            duration_us: MaintenanceMetrics::TICK_BUDGET_US + 1,
            ..Default::default()
        };
        metrics.log();
    }
}

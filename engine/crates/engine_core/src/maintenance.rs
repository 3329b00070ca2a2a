use std::time::{Duration, Instant as StdInstant};

use net::PortalChannel;
use observability::MaintenanceMetrics;
use persistence::keys::RUNTIME;
use persistence::ConfigStore;
use session::{SessionId, SessionMirror};
use tokio::time::Instant;
use world::{ObjectId, World};

use crate::clock::RuntimeClock;

/// Permission that exempts an account from the idle sweep.
pub const NO_IDLE_TIMEOUT: &str = "noidletimeout";

pub const IDLE_REASON: &str = "idle timeout exceeded";
pub const ORPHAN_REASON: &str = "connection lost";

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceConfig {
    /// Nominal tick period.
    pub period: Duration,
    /// Conditional cache flush every N ticks.
    pub cache_check_interval: u64,
    /// Persistence reconnect every N ticks.
    pub reconnect_interval: u64,
    /// Idle threshold in seconds. `<= 0` disables the idle sweep.
    pub idle_timeout: f64,
    /// Instance cache budget for the conditional flush.
    pub cache_max_size: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            cache_check_interval: 5,
            reconnect_interval: 420,
            idle_timeout: 3600.0,
            cache_max_size: 10_000,
        }
    }
}

/// Borrowed view of everything one tick touches.
pub struct MaintenanceContext<'a> {
    pub store: &'a mut dyn ConfigStore,
    pub world: &'a mut World,
    pub sessions: &'a mut SessionMirror,
    pub portal: &'a dyn PortalChannel,
    pub now: Instant,
    /// Wall clock in unix seconds, the time base of session activity stamps.
    pub wall_now: f64,
}

/// The periodic maintenance driver. Owns the runtime clock.
pub struct Maintenance {
    config: MaintenanceConfig,
    clock: RuntimeClock,
    count: u64,
}

impl Maintenance {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            config,
            clock: RuntimeClock::new(),
            count: 0,
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn clock(&self) -> &RuntimeClock {
        &self.clock
    }

    pub fn tick_count(&self) -> u64 {
        self.count
    }

    /// Run one maintenance tick. Nothing here is fatal; failures are logged
    /// and the remaining steps still run.
    pub fn tick(&mut self, ctx: MaintenanceContext<'_>) -> MaintenanceMetrics {
        let started = StdInstant::now();
        self.count += 1;
        let mut metrics = MaintenanceMetrics {
            tick: self.count,
            ..MaintenanceMetrics::default()
        };

        let runtime = self.clock.tick(ctx.store, ctx.now);
        metrics.runtime_secs = runtime;
        if self.clock.has_baseline() {
            if let Err(e) = ctx.store.set(RUNTIME, serde_json::json!(runtime)) {
                tracing::warn!(error = %e, "Failed to persist runtime");
            }
        }

        if every(self.count, self.config.cache_check_interval) {
            metrics.cache_evicted = ctx.world.conditional_flush(self.config.cache_max_size);
        }

        if every(self.count, self.config.reconnect_interval) {
            let world = ctx.world.reconnect();
            let store = ctx.store.reconnect();
            match (world, store) {
                (Ok(()), Ok(())) => metrics.reconnected = true,
                (Err(e), _) => tracing::warn!(error = %e, "Record store reconnect failed"),
                (_, Err(e)) => tracing::warn!(error = %e, "Config store reconnect failed"),
            }
        }

        if self.count > 1 {
            metrics.idle_disconnected =
                idle_sweep(ctx.world, ctx.sessions, ctx.portal, ctx.wall_now, self.config.idle_timeout);
            metrics.orphans_repaired = orphan_sweep(ctx.world, ctx.sessions);
        }

        metrics.sessions = ctx.sessions.len();
        metrics.duration_us = started.elapsed().as_micros();
        metrics
    }
}

fn every(count: u64, interval: u64) -> bool {
    interval > 0 && count % interval == 0
}

/// Disconnect sessions idle longer than `threshold` seconds.
///
/// Candidates are collected before anything is disconnected.
pub fn idle_sweep(
    world: &mut World,
    sessions: &mut SessionMirror,
    portal: &dyn PortalChannel,
    now: f64,
    threshold: f64,
) -> usize {
    let candidates: Vec<(SessionId, Option<world::AccountId>)> = sessions
        .idle_candidates(now, threshold)
        .into_iter()
        .map(|s| (s.session_id, s.account))
        .collect();

    let mut doomed = Vec::with_capacity(candidates.len());
    for (session_id, account) in candidates {
        let exempt = match account {
            Some(account) => match world.account_has_permission(account, NO_IDLE_TIMEOUT) {
                Ok(exempt) => exempt,
                Err(e) => {
                    tracing::warn!(%session_id, error = %e, "Idle exemption lookup failed, keeping session");
                    true
                }
            },
            None => false,
        };
        if !exempt {
            doomed.push(session_id);
        }
    }

    let mut disconnected = 0;
    for session_id in doomed {
        if !sessions.mark_disconnecting(session_id) {
            continue;
        }
        match portal.disconnect_session(session_id, IDLE_REASON) {
            Ok(()) => {
                disconnected += 1;
                tracing::info!(%session_id, "Idle session disconnected");
            }
            Err(e) => {
                sessions.clear_disconnecting(session_id);
                tracing::warn!(%session_id, error = %e, "Idle disconnect not delivered, retrying next sweep");
            }
        }
    }
    disconnected
}

/// Unpuppet objects still tagged as puppeted that no mirrored session
/// controls. Returns the number repaired.
pub fn orphan_sweep(world: &mut World, sessions: &SessionMirror) -> usize {
    let orphans: Vec<ObjectId> = match world.puppeted_objects() {
        Ok(ids) => ids.into_iter().filter(|id| !sessions.is_puppeted(*id)).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Could not list puppeted objects");
            return 0;
        }
    };

    let mut repaired = 0;
    for object in orphans {
        match world.unpuppet(object, None, ORPHAN_REASON) {
            Ok(true) => repaired += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(%object, error = %e, "Orphan repair failed"),
        }
    }
    if repaired > 0 {
        tracing::info!(repaired, "Repaired orphaned puppets");
    }
    repaired
}

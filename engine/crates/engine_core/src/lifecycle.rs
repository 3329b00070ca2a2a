use std::fmt::Display;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use net::{PortalChannel, PortalError, PortalRx, PortalToServer, RequestTracker, RestartMode};
use observability::MaintenanceMetrics;
use persistence::keys::{RUNTIME, SERVER_RESTART_MODE, SERVER_STARTING_MODE};
use persistence::{ConfigStore, ConfigStoreExt, SnapshotManager};
use scripting::{HookRegistry, ServerHook};
use serde_json::Value;
use session::SessionMirror;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use world::{AccountId, AccountRecord, ChannelRecord, HookReport, InstanceHook, ObjectRecord, ScriptRecord, World};

use crate::defaults::reconcile_defaults;
use crate::error::LifecycleError;
use crate::exit::{exit_channel, ExitRx, ExitTx};
use crate::initial_setup::{InitialSetup, SetupContext, SetupOutcome};
use crate::maintenance::{Maintenance, MaintenanceContext};
use crate::settings::LifecycleSettings;
use crate::status::ServerStatus;
use crate::tasks::SchedulerState;

pub const SHUTDOWN_REASON: &str = "server shutdown";

/// Stop requests from outside the portal channel (signals, admin tools).
pub type StopTx = mpsc::UnboundedSender<RestartMode>;
pub type StopRx = mpsc::UnboundedReceiver<RestartMode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Waiting for the Portal handshake. No game hooks have run.
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The Server process state machine.
///
/// Constructed once per process and driven from a single task by
/// [`run`](LifecycleController::run). It is the only owner of the session
/// mirror and the only writer of the restart bookkeeping keys.
pub struct LifecycleController {
    settings: LifecycleSettings,
    store: Box<dyn ConfigStore>,
    world: World,
    sessions: SessionMirror,
    hooks: HookRegistry,
    portal: Box<dyn PortalChannel>,
    setup: InitialSetup,
    maintenance: Maintenance,
    scheduler: SchedulerState,
    state_files: SnapshotManager,
    requests: RequestTracker,
    status: ServerStatus,
    state: LifecycleState,
    ready_seen: bool,
    start_mode: Option<RestartMode>,
    exit: ExitTx,
}

impl LifecycleController {
    pub fn new(
        settings: LifecycleSettings,
        mut store: Box<dyn ConfigStore>,
        world: World,
        hooks: HookRegistry,
        portal: Box<dyn PortalChannel>,
    ) -> (Self, ExitRx) {
        if let Err(e) = store.set(SERVER_STARTING_MODE, Value::Bool(true)) {
            tracing::warn!(error = %e, "Could not flag server as starting, continuing");
        }

        let (exit, exit_rx) = exit_channel();
        let mut status = ServerStatus::new(&settings.servername, &settings.version);
        status.portal_connected = portal.is_connected();

        let controller = Self {
            maintenance: Maintenance::new(settings.maintenance.clone()),
            state_files: SnapshotManager::new(&settings.state_dir),
            settings,
            store,
            world,
            sessions: SessionMirror::new(),
            hooks,
            portal,
            setup: InitialSetup::standard(),
            scheduler: SchedulerState::default(),
            requests: RequestTracker::new(),
            status,
            state: LifecycleState::Starting,
            ready_seen: false,
            start_mode: None,
            exit,
        };
        (controller, exit_rx)
    }

    /// Replace the initial setup step list.
    pub fn with_initial_setup(mut self, setup: InitialSetup) -> Self {
        self.setup = setup;
        self
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn start_mode(&self) -> Option<RestartMode> {
        self.start_mode
    }

    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    pub fn store(&self) -> &dyn ConfigStore {
        self.store.as_ref()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn sessions(&self) -> &SessionMirror {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionMirror {
        &mut self.sessions
    }

    pub fn scheduler(&self) -> &SchedulerState {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut SchedulerState {
        &mut self.scheduler
    }

    /// Tracker for inbound request work that must finish before exit.
    pub fn requests(&self) -> &RequestTracker {
        &self.requests
    }

    pub fn maintenance(&self) -> &Maintenance {
        &self.maintenance
    }

    // --- run loop ---------------------------------------------------------

    /// Drive the controller until a stop sequence completes.
    ///
    /// Returns the mode the server stopped in, or the error that aborted
    /// startup.
    pub async fn run(
        &mut self,
        mut inbound: PortalRx,
        mut stop_requests: StopRx,
    ) -> Result<RestartMode, LifecycleError> {
        let mut ticker: Option<Interval> =
            (self.state == LifecycleState::Running).then(|| self.maintenance_interval());
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        tracing::warn!("Portal channel closed");
                        self.status.portal_connected = false;
                        let was_starting = self.state == LifecycleState::Starting;
                        self.shutdown(RestartMode::Shutdown).await;
                        if was_starting {
                            return Err(PortalError::Disconnected.into());
                        }
                        return Ok(RestartMode::Shutdown);
                    };
                    if let Some(mode) = self.handle_portal_message(msg)? {
                        if self.shutdown(mode).await {
                            return Ok(mode);
                        }
                    }
                    if ticker.is_none() && self.state == LifecycleState::Running {
                        ticker = Some(self.maintenance_interval());
                    }
                }
                Some(mode) = stop_requests.recv() => {
                    if self.shutdown(mode).await {
                        return Ok(mode);
                    }
                }
                _ = next_tick(&mut ticker) => {
                    self.run_maintenance();
                }
            }
        }
    }

    fn maintenance_interval(&self) -> Interval {
        let period = self.settings.maintenance.period.max(Duration::from_millis(1));
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Run one maintenance tick now.
    pub fn run_maintenance(&mut self) -> MaintenanceMetrics {
        let ctx = MaintenanceContext {
            store: self.store.as_mut(),
            world: &mut self.world,
            sessions: &mut self.sessions,
            portal: self.portal.as_ref(),
            now: Instant::now(),
            wall_now: wall_clock(),
        };
        let metrics = self.maintenance.tick(ctx);
        metrics.log();
        self.status.runtime_secs = metrics.runtime_secs;
        self.status.sessions = metrics.sessions;
        self.status.portal_connected = self.portal.is_connected();
        metrics
    }

    // --- portal traffic ---------------------------------------------------

    /// Apply one Portal message. Returns a stop mode when the Portal asks
    /// the server to stop.
    ///
    /// Only a failed startup is returned as an error; everything else is
    /// logged.
    pub fn handle_portal_message(
        &mut self,
        msg: PortalToServer,
    ) -> Result<Option<RestartMode>, LifecycleError> {
        let running = self.state == LifecycleState::Running;
        match msg {
            PortalToServer::SyncSessions { sessions } => {
                tracing::info!(count = sessions.len(), "Session mirror synced from Portal");
                self.sessions.sync_from_portal(sessions);
                self.status.sessions = self.sessions.len();
            }
            PortalToServer::ServerReady { mode } => {
                if self.ready_seen {
                    tracing::warn!(?mode, "Duplicate ServerReady ignored");
                    return Ok(None);
                }
                self.ready_seen = true;
                self.on_server_ready(mode)?;
            }
            PortalToServer::SessionConnected { session } => {
                tracing::debug!(session_id = %session.session_id, "Session connected");
                self.sessions.connect(session);
                self.status.sessions = self.sessions.len();
            }
            PortalToServer::SessionDisconnected { session_id } => {
                let Some(session) = self.sessions.disconnect(session_id) else {
                    return Ok(None);
                };
                self.status.sessions = self.sessions.len();
                if running {
                    if let Some(puppet) = session.puppet {
                        let result = self.world.unpuppet(puppet, session.account, "disconnected");
                        self.note("unpuppet on disconnect", result);
                    }
                    if let Some(account) = session.account {
                        self.refresh_connected(account);
                    }
                }
            }
            PortalToServer::SessionActivity { session_id, timestamp } => {
                self.sessions.touch(session_id, timestamp);
            }
            PortalToServer::SessionLogin { session_id, account } => {
                if self.sessions.login(session_id, account) && running {
                    let result = self.world.set_connected(account, true);
                    self.note("mark account connected", result);
                }
            }
            PortalToServer::SessionPuppet { session_id, puppet } => {
                let account = self.sessions.get(session_id).and_then(|s| s.account);
                match puppet {
                    Some(object) => {
                        if let Some(previous) = self.sessions.unbind_puppet(session_id) {
                            if running && previous != object {
                                let result = self.world.unpuppet(previous, account, "");
                                self.note("unpuppet", result);
                            }
                        }
                        self.sessions.bind_puppet(session_id, object);
                        if let (true, Some(account)) = (running, account) {
                            let result = self.world.puppet(account, object, session_id);
                            self.note("puppet", result);
                        }
                    }
                    None => {
                        if let Some(previous) = self.sessions.unbind_puppet(session_id) {
                            if running {
                                let result = self.world.unpuppet(previous, account, "");
                                self.note("unpuppet", result);
                            }
                        }
                    }
                }
            }
            PortalToServer::Shutdown { mode } => {
                tracing::info!(%mode, "Portal requested stop");
                return Ok(Some(mode));
            }
            PortalToServer::Ack { request_id } => {
                tracing::debug!(request_id, "Unsolicited ack from Portal");
            }
        }
        Ok(None)
    }

    fn refresh_connected(&mut self, account: AccountId) {
        let still_connected = self
            .sessions
            .all_session_ids()
            .into_iter()
            .filter_map(|id| self.sessions.get(id))
            .any(|s| s.account == Some(account));
        if !still_connected {
            let result = self.world.set_connected(account, false);
            self.note("mark account disconnected", result);
        }
    }

    // --- startup ----------------------------------------------------------

    fn resolve_start_mode(&self, announced: Option<RestartMode>) -> RestartMode {
        if let Some(mode) = announced.or(self.settings.start_mode_override) {
            return mode;
        }
        match self.store.get_or::<Option<String>>(SERVER_RESTART_MODE, None) {
            Ok(Some(stored)) => match stored.parse() {
                Ok(RestartMode::Reload) => RestartMode::Reload,
                Ok(RestartMode::Reset) => RestartMode::Reset,
                _ => RestartMode::Shutdown,
            },
            Ok(None) => RestartMode::Shutdown,
            Err(e) => {
                tracing::warn!(error = %e, "Stored restart mode unreadable, assuming cold start");
                RestartMode::Shutdown
            }
        }
    }

    /// Post-handshake initialization. Runs exactly once per process.
    fn on_server_ready(&mut self, announced: Option<RestartMode>) -> Result<(), LifecycleError> {
        let mode = self.resolve_start_mode(announced);
        self.start_mode = Some(mode);
        self.status.start_mode = Some(mode);
        tracing::info!(%mode, sessions = self.sessions.len(), "Portal ready, initializing server");

        let warmed = self.world.warm()?;
        tracing::debug!(warmed, "Instance cache warmed");

        if let Err(e) = self.run_initial_setup() {
            tracing::error!(error = %e, "Initial setup failed, stopping Server and Portal");
            self.status.record_error(e.to_string());
            if let Err(pe) = self.portal.request_portal_shutdown() {
                tracing::warn!(error = %pe, "Could not ask the Portal to shut down");
            }
            self.state = LifecycleState::Stopped;
            self.exit.signal(RestartMode::Shutdown);
            return Err(e);
        }

        self.run_maintenance();

        let reconciled = reconcile_defaults(
            self.store.as_mut(),
            &mut self.world,
            &self.settings.typeclass_defaults,
        );
        if let Some(report) = self.note("typeclass default reconciliation", reconciled) {
            if !report.first_seen.is_empty() && report.changed.is_empty() {
                self.status.push_info("Server started for the first time. Setting defaults.");
            }
            for (name, from, to, rows) in report.changed {
                self.status
                    .push_info(format!("{name}: '{from}' changed to '{to}', {rows} entries updated"));
            }
        }

        let mut report = HookReport::default();
        if let Some(r) = self.world_hook::<ObjectRecord>(InstanceHook::AtInit, |_| true) {
            report.merge(r);
        }
        if let Some(r) = self.world_hook::<AccountRecord>(InstanceHook::AtInit, |_| true) {
            report.merge(r);
        }
        self.record_hook_failures(report);
        self.world.mark_initialized();

        self.dispatch(ServerHook::AtServerInit);
        match mode {
            RestartMode::Reload => self.dispatch(ServerHook::AtServerReloadStart),
            RestartMode::Reset => self.cold_start(),
            RestartMode::Shutdown => {
                self.cold_start();
                let cleared = self.world.clear_all_sessids();
                if let Some(n) = self.note("clear stale session ids", cleared) {
                    tracing::info!(cleared = n, "Stale session ids cleared");
                }
            }
        }
        self.dispatch(ServerHook::AtServerStart);

        self.post_portal_sync(mode);

        if let Err(e) = self.store.delete(SERVER_STARTING_MODE) {
            tracing::warn!(error = %e, "Could not clear the starting flag");
        }
        self.state = LifecycleState::Running;
        tracing::info!(%mode, "Server started");
        Ok(())
    }

    fn run_initial_setup(&mut self) -> Result<(), LifecycleError> {
        let mut ctx = SetupContext {
            world: &mut self.world,
            hooks: &mut self.hooks,
            defaults: &self.settings.typeclass_defaults,
            superuser_name: &self.settings.superuser_name,
        };
        match self.setup.run(self.store.as_mut(), &mut ctx)? {
            SetupOutcome::AlreadyDone => {}
            SetupOutcome::Ran { resumed_after: Some(step), .. } => {
                self.status.push_info(format!("Resumed initial setup after step '{step}'."));
            }
            SetupOutcome::Ran { resumed_after: None, .. } => {
                self.status.push_info("Initial setup completed.");
            }
        }
        Ok(())
    }

    fn cold_start(&mut self) {
        let purged = self.world.delete_non_persistent_scripts();
        if let Some(n) = self.note("purge non-persistent scripts", purged) {
            tracing::info!(purged = n, "Non-persistent scripts purged");
        }
        if let Some(guest) = self.settings.guest_typeclass.clone() {
            let removed = self.world.delete_guest_accounts(&guest);
            self.note("remove guest accounts", removed);
        }
        self.dispatch(ServerHook::AtServerColdStart);
    }

    fn post_portal_sync(&mut self, mode: RestartMode) {
        let restored = SchedulerState::restore(&self.state_files, mode);
        if let Some(state) = self.note("restore scheduler state", restored) {
            tracing::info!(
                tickers = state.tickers.len(),
                tasks = state.tasks.len(),
                monitors = state.monitors.len(),
                "Scheduler state restored"
            );
            self.scheduler = state;
        }

        let updated = self.world.update_scripts_after_server_start();
        if let Some(report) = self.note("update scripts after start", updated) {
            tracing::info!(
                resumed = report.resumed,
                restarted = report.restarted,
                removed = report.removed,
                "Scripts updated after start"
            );
        }

        let channels = self.create_default_channels();
        self.note("create default channels", channels);

        if let Err(e) = self.store.delete(SERVER_RESTART_MODE) {
            tracing::warn!(error = %e, "Could not clear the restart mode marker");
        }
    }

    fn create_default_channels(&mut self) -> Result<(), LifecycleError> {
        let superuser = self
            .world
            .stored::<AccountRecord>()?
            .into_iter()
            .find(|a| a.is_superuser)
            .map(|a| a.id);
        let fallback_path = self
            .settings
            .typeclass_defaults
            .get("BASE_CHANNEL_TYPECLASS")
            .unwrap_or_default()
            .to_string();

        for spec in self.settings.default_channels.clone() {
            if self.world.find_channel(&spec.key)?.is_some() {
                continue;
            }
            let path = spec.typeclass_path.clone().unwrap_or_else(|| fallback_path.clone());
            let id = self
                .world
                .create(ChannelRecord::new(&spec.key, path).with_description(&spec.description))?;
            if let (true, Some(account)) = (spec.connect_superuser, superuser) {
                self.world.subscribe(id, account)?;
            }
            tracing::info!(channel = %spec.key, "Default channel created");
        }
        Ok(())
    }

    // --- shutdown ---------------------------------------------------------

    /// Run the stop sequence for `mode`.
    ///
    /// Returns `false` when a stop already ran or is running; such calls
    /// change nothing.
    pub async fn shutdown(&mut self, mode: RestartMode) -> bool {
        match self.state {
            LifecycleState::Stopping | LifecycleState::Stopped => {
                tracing::debug!(%mode, "Stop already in progress, request ignored");
                return false;
            }
            LifecycleState::Starting => {
                tracing::info!(%mode, "Stop requested before the Portal handshake");
                self.state = LifecycleState::Stopped;
                self.requests.drain().await;
                self.exit.signal(mode);
                return true;
            }
            LifecycleState::Running => {}
        }

        self.state = LifecycleState::Stopping;
        tracing::info!(%mode, "Server stopping");

        match mode {
            RestartMode::Reload => self.stop_for_reload().await,
            RestartMode::Reset | RestartMode::Shutdown => self.stop_cold(mode).await,
        }

        let saved = self.scheduler.save(&self.state_files, mode);
        self.note("save scheduler state", saved);
        self.dispatch(ServerHook::AtServerStop);

        if self.requests.in_flight() > 0 {
            tracing::info!(in_flight = self.requests.in_flight(), "Waiting for in-flight requests");
        }
        self.requests.drain().await;

        self.state = LifecycleState::Stopped;
        self.exit.signal(mode);

        let runtime = self.maintenance.clock().current(Instant::now());
        if self.maintenance.clock().has_baseline() {
            if let Err(e) = self.store.set(RUNTIME, serde_json::json!(runtime)) {
                tracing::warn!(error = %e, "Failed to persist final runtime");
            }
        }
        self.status.runtime_secs = runtime;
        tracing::info!(%mode, runtime, "Server stopped");
        true
    }

    async fn stop_for_reload(&mut self) {
        self.sync_sessions_to_portal().await;
        self.store_restart_marker(RestartMode::Reload);

        let mut report = HookReport::default();
        if let Some(r) = self.world_hook::<AccountRecord>(InstanceHook::AtServerReload, |_| true) {
            report.merge(r);
        }
        if let Some(r) = self.world_hook::<ObjectRecord>(InstanceHook::AtServerReload, |_| true) {
            report.merge(r);
        }
        if let Some(r) = self.world_hook::<ScriptRecord>(InstanceHook::AtServerReload, ScriptRecord::is_active) {
            report.merge(r);
        }
        self.record_hook_failures(report);

        let paused = self.world.pause_active_scripts(true);
        if let Some(n) = self.note("pause scripts", paused) {
            tracing::info!(paused = n, "Active scripts paused for reload");
        }
        self.dispatch(ServerHook::AtServerReloadStop);
    }

    async fn stop_cold(&mut self, mode: RestartMode) {
        if mode == RestartMode::Shutdown {
            for account in self.world.cached_ids::<AccountRecord>() {
                let unpuppeted = self.world.unpuppet_all(account);
                self.note("unpuppet account", unpuppeted);
                let cleared = self.world.set_connected(account, false);
                self.note("mark account disconnected", cleared);
            }
        }

        let mut report = HookReport::default();
        if let Some(r) = self.world_hook::<AccountRecord>(InstanceHook::AtServerShutdown, |_| true) {
            report.merge(r);
        }
        if let Some(r) = self.world_hook::<ObjectRecord>(InstanceHook::AtServerShutdown, |_| true) {
            report.merge(r);
        }
        if let Some(r) = self.world_hook::<ScriptRecord>(InstanceHook::AtServerShutdown, ScriptRecord::is_active) {
            report.merge(r);
        }
        self.record_hook_failures(report);

        if mode == RestartMode::Shutdown {
            let cleared = self.world.clear_all_sessids();
            self.note("clear session ids", cleared);
            for session_id in self.sessions.all_session_ids() {
                if let Err(e) = self.portal.disconnect_session(session_id, SHUTDOWN_REASON) {
                    tracing::warn!(%session_id, error = %e, "Disconnect not delivered");
                }
                self.sessions.disconnect(session_id);
            }
        }

        let stopped = self.world.cold_stop_scripts();
        if let Some(report) = self.note("stop scripts", stopped) {
            tracing::info!(stopped = report.stopped, deleted = report.deleted, "Scripts stopped");
        }

        // Reset and shutdown both leave the reset marker.
        self.store_restart_marker(RestartMode::Reset);
        if mode == RestartMode::Reset {
            self.sync_sessions_to_portal().await;
        }
        self.dispatch(ServerHook::AtServerColdStop);
    }

    /// Push the session mirror to the Portal. Skipped with a warning when
    /// the Portal is gone or does not answer in time.
    async fn sync_sessions_to_portal(&mut self) -> bool {
        if !self.portal.is_connected() {
            tracing::warn!("Portal unavailable, session sync skipped");
            self.status.portal_connected = false;
            return false;
        }
        let snapshot = self.sessions.portal_snapshot();
        let count = snapshot.len();
        let timeout = self.settings.sync_timeout;
        match time::timeout(timeout, self.portal.sync_sessions(snapshot)).await {
            Ok(Ok(())) => {
                tracing::info!(sessions = count, "Sessions synced to Portal");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Session sync failed, skipped");
                self.status.portal_connected = self.portal.is_connected();
                false
            }
            Err(_) => {
                tracing::warn!(?timeout, "Session sync timed out, skipped");
                false
            }
        }
    }

    fn store_restart_marker(&mut self, mode: RestartMode) {
        if let Err(e) = self.store.set(SERVER_RESTART_MODE, Value::String(mode.as_str().to_string())) {
            tracing::warn!(error = %e, %mode, "Could not store restart mode");
        }
    }

    // --- helpers ----------------------------------------------------------

    fn world_hook<R: world::Cached>(
        &mut self,
        hook: InstanceHook,
        filter: impl Fn(&R) -> bool,
    ) -> Option<HookReport> {
        let result = self.world.call_hook::<R>(hook, filter);
        self.note(hook.name(), result)
    }

    fn record_hook_failures(&mut self, report: HookReport) {
        for failure in report.failures {
            self.status
                .record_error(format!("{} on {}: {}", failure.hook, failure.instance, failure.error));
        }
    }

    fn dispatch(&mut self, hook: ServerHook) {
        let report = self.hooks.dispatch(hook);
        for failure in report.failures {
            self.status
                .record_error(format!("{} in module '{}': {}", hook.name(), failure.module, failure.error));
        }
    }

    /// Log and record a non-fatal failure.
    fn note<T, E: Display>(&mut self, what: &str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{what} failed");
                self.status.record_error(format!("{what}: {e}"));
                None
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

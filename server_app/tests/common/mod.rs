#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use engine_core::{ExitRx, InitialSetup, LifecycleController, LifecycleSettings, MaintenanceConfig};
use net::{portal_pair, Outbound, PortalEnd, PortalEvent, PortalRx, PortalToServer, PortalTx, RestartMode};
use persistence::{ConfigStore, Database, PersistenceError};
use scripting::{FnModule, HookRegistry, ServerHook};
use serde_json::Value;
use tempfile::TempDir;
use world::{AccountId, HookError, Instance, ObjectRecord, Typeclass, TypeclassRegistry, World};

pub const ACCOUNT_TC: &str = "typeclasses.accounts.Account";
pub const CHARACTER_TC: &str = "typeclasses.characters.Character";
pub const SCRIPT_TC: &str = "typeclasses.scripts.Script";

/// Config store shared across simulated restarts, logging every write.
#[derive(Clone, Default)]
pub struct SharedStore {
    values: Arc<Mutex<BTreeMap<String, Value>>>,
    writes: Arc<Mutex<Vec<String>>>,
}

impl SharedStore {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn runtime(&self) -> f64 {
        self.value(persistence::keys::RUNTIME)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }
}

impl ConfigStore for SharedStore {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.writes.lock().unwrap().push(format!("set {key}"));
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.writes.lock().unwrap().push(format!("delete {key}"));
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Shared log of hook calls: process hooks by name, instance hooks as
/// `"<hook> <instance>"`.
pub type HookLog = Arc<Mutex<Vec<String>>>;

pub fn recording_module(log: &HookLog) -> FnModule {
    let mut module = FnModule::new("recorder");
    for hook in ServerHook::ALL {
        let log = Arc::clone(log);
        module = module.on(hook, move || {
            log.lock().unwrap().push(hook.name().to_string());
            Ok(())
        });
    }
    module
}

/// Typeclass that records every hook it receives.
pub struct RecordingTypeclass {
    pub log: HookLog,
}

impl Typeclass for RecordingTypeclass {
    fn at_init(&self, instance: &mut Instance<'_>) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("at_init {}", instance.label()));
        Ok(())
    }

    fn at_server_reload(&self, instance: &mut Instance<'_>) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("at_server_reload {}", instance.label()));
        Ok(())
    }

    fn at_server_shutdown(&self, instance: &mut Instance<'_>) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("at_server_shutdown {}", instance.label()));
        Ok(())
    }

    fn at_pre_unpuppet(&self, object: &mut ObjectRecord) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("at_pre_unpuppet {}", object.id));
        Ok(())
    }

    fn at_post_unpuppet(
        &self,
        object: &mut ObjectRecord,
        account: Option<AccountId>,
        reason: &str,
    ) -> Result<(), HookError> {
        let account = account.map(|a| a.to_string()).unwrap_or_else(|| "none".to_string());
        self.log
            .lock()
            .unwrap()
            .push(format!("at_post_unpuppet {} {} {}", object.id, account, reason));
        Ok(())
    }
}

/// Durable state that survives simulated process restarts.
pub struct Env {
    pub dir: TempDir,
    pub store: SharedStore,
    pub log: HookLog,
}

pub struct Node {
    pub controller: LifecycleController,
    pub portal: PortalEnd,
    pub inbound: Option<PortalRx>,
    pub exit: ExitRx,
}

impl Env {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            store: SharedStore::default(),
            log: HookLog::default(),
        }
    }

    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            state_dir: self.dir.path().join("state"),
            sync_timeout: Duration::from_millis(200),
            maintenance: MaintenanceConfig {
                idle_timeout: 300.0,
                ..MaintenanceConfig::default()
            },
            ..LifecycleSettings::default()
        }
    }

    pub fn world(&self) -> World {
        let mut typeclasses = TypeclassRegistry::new();
        let recorder: Arc<dyn Typeclass> = Arc::new(RecordingTypeclass {
            log: Arc::clone(&self.log),
        });
        for path in [ACCOUNT_TC, CHARACTER_TC, SCRIPT_TC] {
            typeclasses.register(path, Arc::clone(&recorder));
        }
        let db = Database::open(self.dir.path().join("world.db3")).unwrap();
        World::new(db, typeclasses)
    }

    pub fn hooks(&self) -> HookRegistry {
        let mut hooks = HookRegistry::new();
        hooks.register(Box::new(recording_module(&self.log)));
        hooks
    }

    pub fn boot(&self) -> Node {
        self.boot_with(self.settings(), InitialSetup::standard())
    }

    pub fn boot_with(&self, settings: LifecycleSettings, setup: InitialSetup) -> Node {
        let (link, inbound, portal) = portal_pair();
        let (controller, exit) = LifecycleController::new(
            settings,
            Box::new(self.store.clone()),
            self.world(),
            self.hooks(),
            Box::new(link),
        );
        Node {
            controller: controller.with_initial_setup(setup),
            portal,
            inbound: Some(inbound),
            exit,
        }
    }

    pub fn hook_log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl Node {
    pub fn ready(&mut self, mode: Option<RestartMode>) {
        self.controller
            .handle_portal_message(PortalToServer::ServerReady { mode })
            .unwrap();
    }

    /// Answer Server → Portal traffic in the background.
    pub fn spawn_responder(&mut self) -> (PortalTx, Arc<Mutex<Vec<PortalEvent>>>) {
        let (_, _, placeholder) = portal_pair();
        let mut end = std::mem::replace(&mut self.portal, placeholder);
        let sender = end.inbound.clone();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        tokio::spawn(async move {
            while let Some(event) = end.respond().await {
                sink.lock().unwrap().push(event);
            }
        });
        (sender, events)
    }

    /// Everything the Server has sent so far, without answering syncs.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        let mut seen = Vec::new();
        while let Ok(msg) = self.portal.outbound.try_recv() {
            seen.push(msg);
        }
        seen
    }
}

pub fn wall_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

use persistence::keys::LAST_INITIAL_SETUP_STEP;
use persistence::ConfigStore;
use scripting::{HookRegistry, ServerHook};
use serde_json::Value;
use world::{AccountRecord, ObjectRecord, World};

use crate::defaults::TypeclassDefaults;
use crate::error::LifecycleError;

pub const DONE: &str = "done";
pub const LIMBO: &str = "Limbo";

/// What a setup step may touch.
pub struct SetupContext<'a> {
    pub world: &'a mut World,
    pub hooks: &'a mut HookRegistry,
    pub defaults: &'a TypeclassDefaults,
    pub superuser_name: &'a str,
}

pub type SetupStep = Box<dyn FnMut(&mut SetupContext<'_>) -> Result<(), LifecycleError> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Setup had already finished on an earlier start.
    AlreadyDone,
    Ran {
        /// The completed step this run resumed after, if any.
        resumed_after: Option<String>,
        steps: Vec<String>,
    },
}

/// Ordered, resumable first-start population.
///
/// After each successful step its name is stored as the progress marker,
/// so a crashed setup continues after the last completed step.
pub struct InitialSetup {
    steps: Vec<(String, SetupStep)>,
}

impl InitialSetup {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// `create_objects`, `at_initial_setup`, `done`.
    pub fn standard() -> Self {
        Self::new()
            .step("create_objects", create_objects)
            .step("at_initial_setup", at_initial_setup)
            .step(DONE, |_| Ok(()))
    }

    pub fn step<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut SetupContext<'_>) -> Result<(), LifecycleError> + Send + 'static,
    {
        self.steps.push((name.into(), Box::new(f)));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn run(
        &mut self,
        store: &mut dyn ConfigStore,
        ctx: &mut SetupContext<'_>,
    ) -> Result<SetupOutcome, LifecycleError> {
        let marker = store.get(LAST_INITIAL_SETUP_STEP)?;
        let start = match &marker {
            None | Some(Value::Null) => {
                tracing::info!("Server started for the first time, running initial setup");
                0
            }
            Some(Value::String(step)) if step == DONE => return Ok(SetupOutcome::AlreadyDone),
            // Legacy "finished" marker; kept alongside "done" until confirmed unused.
            Some(Value::Number(n)) if n.as_i64() == Some(-1) => return Ok(SetupOutcome::AlreadyDone),
            Some(Value::String(step)) => match self.steps.iter().position(|(name, _)| name == step) {
                Some(index) => {
                    tracing::info!(after = %step, "Resuming initial setup");
                    index + 1
                }
                None => {
                    return Err(LifecycleError::Setup {
                        step: step.clone(),
                        reason: "unknown setup step marker".to_string(),
                    })
                }
            },
            Some(other) => {
                return Err(LifecycleError::Config(format!(
                    "unreadable setup marker {other}"
                )))
            }
        };
        let resumed_after = match marker {
            Some(Value::String(step)) => Some(step),
            _ => None,
        };

        let mut ran = Vec::new();
        for (name, step) in self.steps.iter_mut().skip(start) {
            if let Err(e) = step(ctx) {
                tracing::error!(step = %name, error = %e, "Initial setup step failed");
                return Err(match e {
                    LifecycleError::Setup { .. } => e,
                    other => LifecycleError::Setup {
                        step: name.clone(),
                        reason: other.to_string(),
                    },
                });
            }
            store.set(LAST_INITIAL_SETUP_STEP, Value::String(name.clone()))?;
            tracing::info!(step = %name, "Initial setup step completed");
            ran.push(name.clone());
        }
        Ok(SetupOutcome::Ran {
            resumed_after,
            steps: ran,
        })
    }
}

impl Default for InitialSetup {
    fn default() -> Self {
        Self::standard()
    }
}

fn default_path(defaults: &TypeclassDefaults, name: &str) -> Result<String, LifecycleError> {
    defaults
        .get(name)
        .map(str::to_string)
        .ok_or_else(|| LifecycleError::Config(format!("missing typeclass default {name}")))
}

/// Superuser account, the Limbo room and the superuser character.
/// Safe to re-run: existing pieces are reused.
pub fn create_objects(ctx: &mut SetupContext<'_>) -> Result<(), LifecycleError> {
    let world = &mut *ctx.world;

    let superuser = match world.stored::<AccountRecord>()?.into_iter().find(|a| a.is_superuser) {
        Some(acc) => acc.id,
        None => {
            let mut acc =
                AccountRecord::new(ctx.superuser_name, default_path(ctx.defaults, "BASE_ACCOUNT_TYPECLASS")?)
                    .superuser();
            acc.cmdset_storage = Some(default_path(ctx.defaults, "CMDSET_ACCOUNT")?);
            let id = world.create(acc)?;
            tracing::info!(account = %id, name = ctx.superuser_name, "Superuser account created");
            id
        }
    };

    let room_path = default_path(ctx.defaults, "BASE_ROOM_TYPECLASS")?;
    let limbo = match world
        .stored::<ObjectRecord>()?
        .into_iter()
        .find(|o| o.key == LIMBO && o.location.is_none())
    {
        Some(room) => room.id,
        None => world.create(ObjectRecord::new(LIMBO, room_path))?,
    };

    let has_character = world
        .get::<AccountRecord>(superuser)?
        .is_some_and(|acc| !acc.characters.is_empty());
    if !has_character {
        let character = ObjectRecord::new(
            ctx.superuser_name,
            default_path(ctx.defaults, "BASE_CHARACTER_TYPECLASS")?,
        )
        .with_cmdset(default_path(ctx.defaults, "CMDSET_CHARACTER")?)
        .with_location(limbo);
        let id = world.create(character)?;
        world.update::<AccountRecord>(superuser, |acc| acc.characters.push(id))?;
    }
    Ok(())
}

/// Give hook modules their one chance at first-start setup. Any module
/// failure aborts setup.
pub fn at_initial_setup(ctx: &mut SetupContext<'_>) -> Result<(), LifecycleError> {
    let report = ctx.hooks.dispatch(ServerHook::AtInitialSetup);
    match report.failures.into_iter().next() {
        None => Ok(()),
        Some(failure) => Err(LifecycleError::Setup {
            step: "at_initial_setup".to_string(),
            reason: format!("module '{}': {}", failure.module, failure.error),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::{Database, MemoryConfigStore};
    use scripting::{FnModule, ScriptError};
    use std::sync::{Arc, Mutex};
    use world::TypeclassRegistry;

    struct Fixture {
        world: World,
        hooks: HookRegistry,
        defaults: TypeclassDefaults,
        store: MemoryConfigStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                world: World::new(Database::open_memory().unwrap(), TypeclassRegistry::new()),
                hooks: HookRegistry::new(),
                defaults: TypeclassDefaults::default(),
                store: MemoryConfigStore::new(),
            }
        }

        fn run(&mut self, setup: &mut InitialSetup) -> Result<SetupOutcome, LifecycleError> {
            let mut ctx = SetupContext {
                world: &mut self.world,
                hooks: &mut self.hooks,
                defaults: &self.defaults,
                superuser_name: "admin",
            };
            setup.run(&mut self.store, &mut ctx)
        }

        fn marker(&self) -> Option<Value> {
            self.store.get(LAST_INITIAL_SETUP_STEP).unwrap()
        }
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl FnMut(&mut SetupContext<'_>) -> Result<(), LifecycleError> + Send + 'static {
        let log = Arc::clone(log);
        move |_| {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    #[test]
    fn empty_store_runs_everything_and_marks_done() {
        let mut fx = Fixture::new();
        let outcome = fx.run(&mut InitialSetup::standard()).unwrap();
        assert_eq!(
            outcome,
            SetupOutcome::Ran {
                resumed_after: None,
                steps: vec!["create_objects".into(), "at_initial_setup".into(), "done".into()],
            }
        );
        assert_eq!(fx.marker(), Some(Value::String("done".into())));

        let accounts = fx.world.stored::<AccountRecord>().unwrap();
        assert_eq!(accounts.len(), 1);
        assert!(accounts[0].is_superuser);
        assert_eq!(accounts[0].characters.len(), 1);
        let objects = fx.world.stored::<ObjectRecord>().unwrap();
        assert!(objects.iter().any(|o| o.key == LIMBO));

        assert_eq!(fx.run(&mut InitialSetup::standard()).unwrap(), SetupOutcome::AlreadyDone);
    }

    #[test]
    fn resumes_after_last_completed_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fail_once = Arc::new(Mutex::new(true));
        let flag = Arc::clone(&fail_once);
        let mut setup = InitialSetup::new()
            .step("one", recording(&log, "one"))
            .step("two", move |_| {
                if std::mem::replace(&mut *flag.lock().unwrap(), false) {
                    Err(LifecycleError::Config("disk full".into()))
                } else {
                    Ok(())
                }
            })
            .step("three", recording(&log, "three"))
            .step(DONE, |_| Ok(()));

        let mut fx = Fixture::new();
        let err = fx.run(&mut setup).unwrap_err();
        assert!(matches!(err, LifecycleError::Setup { ref step, .. } if step == "two"));
        assert_eq!(fx.marker(), Some(Value::String("one".into())));

        let outcome = fx.run(&mut setup).unwrap();
        assert_eq!(
            outcome,
            SetupOutcome::Ran {
                resumed_after: Some("one".into()),
                steps: vec!["two".into(), "three".into(), "done".into()],
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["one", "three"]);
    }

    #[test]
    fn minus_one_marker_skips_setup() {
        let mut fx = Fixture::new();
        fx.store.set(LAST_INITIAL_SETUP_STEP, serde_json::json!(-1)).unwrap();
        assert_eq!(fx.run(&mut InitialSetup::standard()).unwrap(), SetupOutcome::AlreadyDone);
        assert!(fx.world.stored::<AccountRecord>().unwrap().is_empty());
    }

    #[test]
    fn unknown_marker_is_a_setup_error() {
        let mut fx = Fixture::new();
        fx.store.set(LAST_INITIAL_SETUP_STEP, serde_json::json!("collectstatic")).unwrap();
        assert!(matches!(
            fx.run(&mut InitialSetup::standard()),
            Err(LifecycleError::Setup { .. })
        ));
    }

    #[test]
    fn create_objects_is_idempotent() {
        let mut fx = Fixture::new();
        for _ in 0..2 {
            let mut ctx = SetupContext {
                world: &mut fx.world,
                hooks: &mut fx.hooks,
                defaults: &fx.defaults,
                superuser_name: "admin",
            };
            create_objects(&mut ctx).unwrap();
        }
        assert_eq!(fx.world.stored::<AccountRecord>().unwrap().len(), 1);
        assert_eq!(fx.world.stored::<ObjectRecord>().unwrap().len(), 2);
    }

    #[test]
    fn failing_initial_setup_hook_aborts() {
        let mut fx = Fixture::new();
        fx.hooks.register(Box::new(
            FnModule::new("broken").on(ServerHook::AtInitialSetup, || Err(ScriptError::Failed("boom".into()))),
        ));
        let err = fx.run(&mut InitialSetup::standard()).unwrap_err();
        assert!(matches!(err, LifecycleError::Setup { ref step, .. } if step == "at_initial_setup"));
        assert_eq!(fx.marker(), Some(Value::String("create_objects".into())));
    }
}

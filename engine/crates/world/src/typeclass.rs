use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HookError;
use crate::ids::AccountId;
use crate::model::{AccountRecord, ChannelRecord, ObjectRecord, ScriptRecord};

/// Mutable view of one cached instance handed to a hook.
pub enum Instance<'a> {
    Object(&'a mut ObjectRecord),
    Account(&'a mut AccountRecord),
    Script(&'a mut ScriptRecord),
    Channel(&'a mut ChannelRecord),
}

impl Instance<'_> {
    /// e.g. `object #3`.
    pub fn label(&self) -> String {
        match self {
            Instance::Object(o) => format!("object {}", o.id),
            Instance::Account(a) => format!("account {}", a.id),
            Instance::Script(s) => format!("script {}", s.id),
            Instance::Channel(c) => format!("channel {}", c.id),
        }
    }
}

/// Behavior bound to a typeclass path. Every hook defaults to a no-op.
pub trait Typeclass: Send + Sync {
    /// Called whenever the instance enters the cache after startup init.
    fn at_init(&self, _instance: &mut Instance<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn at_server_reload(&self, _instance: &mut Instance<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn at_server_shutdown(&self, _instance: &mut Instance<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn at_pre_unpuppet(&self, _object: &mut ObjectRecord) -> Result<(), HookError> {
        Ok(())
    }

    /// `account` is `None` when the puppeting account is gone, e.g. after a crash.
    fn at_post_unpuppet(
        &self,
        _object: &mut ObjectRecord,
        _account: Option<AccountId>,
        _reason: &str,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Typeclass used for paths nobody registered.
#[derive(Debug, Default)]
pub struct DefaultTypeclass;

impl Typeclass for DefaultTypeclass {}

/// Per-instance hooks run in batches over the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceHook {
    AtInit,
    AtServerReload,
    AtServerShutdown,
}

impl InstanceHook {
    pub fn name(self) -> &'static str {
        match self {
            InstanceHook::AtInit => "at_init",
            InstanceHook::AtServerReload => "at_server_reload",
            InstanceHook::AtServerShutdown => "at_server_shutdown",
        }
    }

    pub fn invoke(self, typeclass: &dyn Typeclass, instance: &mut Instance<'_>) -> Result<(), HookError> {
        match self {
            InstanceHook::AtInit => typeclass.at_init(instance),
            InstanceHook::AtServerReload => typeclass.at_server_reload(instance),
            InstanceHook::AtServerShutdown => typeclass.at_server_shutdown(instance),
        }
    }
}

/// Maps typeclass paths to their behavior.
pub struct TypeclassRegistry {
    classes: HashMap<String, Arc<dyn Typeclass>>,
    fallback: Arc<dyn Typeclass>,
}

impl Default for TypeclassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeclassRegistry {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
            fallback: Arc::new(DefaultTypeclass),
        }
    }

    pub fn register(&mut self, path: impl Into<String>, typeclass: Arc<dyn Typeclass>) {
        self.classes.insert(path.into(), typeclass);
    }

    /// Behavior for `path`, falling back to the no-op typeclass.
    pub fn resolve(&self, path: &str) -> Arc<dyn Typeclass> {
        self.classes
            .get(path)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.classes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Failing;
    impl Typeclass for Failing {
        fn at_server_reload(&self, instance: &mut Instance<'_>) -> Result<(), HookError> {
            Err(HookError::new(format!("{} refuses", instance.label())))
        }
    }

    #[derive(Default)]
    struct Renamer(Mutex<usize>);
    impl Typeclass for Renamer {
        fn at_init(&self, instance: &mut Instance<'_>) -> Result<(), HookError> {
            if let Instance::Object(obj) = instance {
                obj.key = format!("{}!", obj.key);
            }
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn unknown_path_resolves_to_noop() {
        let registry = TypeclassRegistry::new();
        let tc = registry.resolve("nowhere.Thing");
        let mut obj = ObjectRecord::new("x", "nowhere.Thing");
        assert!(InstanceHook::AtServerShutdown
            .invoke(tc.as_ref(), &mut Instance::Object(&mut obj))
            .is_ok());
    }

    #[test]
    fn registered_hooks_run_and_can_fail() {
        let mut registry = TypeclassRegistry::new();
        let renamer = Arc::new(Renamer::default());
        registry.register("t.Renamer", renamer.clone());
        registry.register("t.Failing", Arc::new(Failing));
        assert_eq!(registry.len(), 2);

        let mut obj = ObjectRecord::new("rock", "t.Renamer");
        InstanceHook::AtInit
            .invoke(registry.resolve("t.Renamer").as_ref(), &mut Instance::Object(&mut obj))
            .unwrap();
        assert_eq!(obj.key, "rock!");
        assert_eq!(*renamer.0.lock().unwrap(), 1);

        let err = InstanceHook::AtServerReload
            .invoke(registry.resolve("t.Failing").as_ref(), &mut Instance::Object(&mut obj))
            .unwrap_err();
        assert_eq!(err.to_string(), "object #0 refuses");
    }
}

use std::collections::HashMap;

use crate::error::ScriptError;

/// Process-wide lifecycle milestones a hook module may react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerHook {
    AtServerInit,
    AtServerStart,
    AtServerStop,
    AtServerReloadStart,
    AtServerReloadStop,
    AtServerColdStart,
    AtServerColdStop,
    /// Runs once, during the first-ever start.
    AtInitialSetup,
}

impl ServerHook {
    pub const ALL: [ServerHook; 8] = [
        ServerHook::AtServerInit,
        ServerHook::AtServerStart,
        ServerHook::AtServerStop,
        ServerHook::AtServerReloadStart,
        ServerHook::AtServerReloadStop,
        ServerHook::AtServerColdStart,
        ServerHook::AtServerColdStop,
        ServerHook::AtInitialSetup,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ServerHook::AtServerInit => "at_server_init",
            ServerHook::AtServerStart => "at_server_start",
            ServerHook::AtServerStop => "at_server_stop",
            ServerHook::AtServerReloadStart => "at_server_reload_start",
            ServerHook::AtServerReloadStop => "at_server_reload_stop",
            ServerHook::AtServerColdStart => "at_server_cold_start",
            ServerHook::AtServerColdStop => "at_server_cold_stop",
            ServerHook::AtInitialSetup => "at_initial_setup",
        }
    }
}

/// An externally supplied module implementing any subset of [`ServerHook`]s.
pub trait StartStopModule: Send {
    fn name(&self) -> &str;

    /// Capability check: does this module define `hook`?
    fn provides(&self, hook: ServerHook) -> bool;

    fn invoke(&mut self, hook: ServerHook) -> Result<(), ScriptError>;
}

type HookFn = Box<dyn FnMut() -> Result<(), ScriptError> + Send>;

/// Hook module built from Rust closures.
pub struct FnModule {
    name: String,
    hooks: HashMap<ServerHook, HookFn>,
}

impl FnModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: HashMap::new(),
        }
    }

    pub fn on<F>(mut self, hook: ServerHook, f: F) -> Self
    where
        F: FnMut() -> Result<(), ScriptError> + Send + 'static,
    {
        self.hooks.insert(hook, Box::new(f));
        self
    }
}

impl StartStopModule for FnModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self, hook: ServerHook) -> bool {
        self.hooks.contains_key(&hook)
    }

    fn invoke(&mut self, hook: ServerHook) -> Result<(), ScriptError> {
        match self.hooks.get_mut(&hook) {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

/// A module whose hook call failed during one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailure {
    pub module: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub hook: ServerHook,
    /// Modules that defined the hook, in call order.
    pub called: Vec<String>,
    pub failures: Vec<ModuleFailure>,
}

/// Ordered registry of hook modules.
///
/// Dispatch walks modules in registration order; a later module may rely
/// on side effects of an earlier one. Modules lacking a hook are skipped.
#[derive(Default)]
pub struct HookRegistry {
    modules: Vec<Box<dyn StartStopModule>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn StartStopModule>) {
        tracing::info!(module = module.name(), position = self.modules.len(), "Hook module registered");
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Call `hook` on every module that provides it. A failing module is
    /// logged and reported; later modules still run.
    pub fn dispatch(&mut self, hook: ServerHook) -> DispatchReport {
        let mut report = DispatchReport {
            hook,
            called: Vec::new(),
            failures: Vec::new(),
        };
        for module in self.modules.iter_mut() {
            if !module.provides(hook) {
                continue;
            }
            report.called.push(module.name().to_string());
            if let Err(e) = module.invoke(hook) {
                tracing::warn!(module = module.name(), hook = hook.name(), error = %e, "Hook module failed");
                report.failures.push(ModuleFailure {
                    module: module.name().to_string(),
                    error: e.to_string(),
                });
            }
        }
        tracing::debug!(hook = hook.name(), called = report.called.len(), "Hook dispatched");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>, hooks: &[ServerHook]) -> FnModule {
        let mut module = FnModule::new(name);
        for hook in hooks {
            let log = log.clone();
            let tag = format!("{name}:{}", hook.name());
            module = module.on(*hook, move || {
                log.lock().unwrap().push(tag.clone());
                Ok(())
            });
        }
        module
    }

    #[test]
    fn dispatch_follows_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register(Box::new(recording("b", &log, &[ServerHook::AtServerStart])));
        registry.register(Box::new(recording("a", &log, &[ServerHook::AtServerStart])));

        let report = registry.dispatch(ServerHook::AtServerStart);
        assert_eq!(report.called, vec!["b", "a"]);
        assert_eq!(*log.lock().unwrap(), vec!["b:at_server_start", "a:at_server_start"]);
    }

    #[test]
    fn missing_hooks_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register(Box::new(recording("only_stop", &log, &[ServerHook::AtServerStop])));

        let report = registry.dispatch(ServerHook::AtServerColdStart);
        assert!(report.called.is_empty());
        assert!(report.failures.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn failure_does_not_stop_later_modules() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register(Box::new(
            FnModule::new("broken").on(ServerHook::AtServerInit, || {
                Err(ScriptError::Failed("boom".into()))
            }),
        ));
        registry.register(Box::new(recording("after", &log, &[ServerHook::AtServerInit])));

        let report = registry.dispatch(ServerHook::AtServerInit);
        assert_eq!(report.called, vec!["broken", "after"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].module, "broken");
        assert_eq!(*log.lock().unwrap(), vec!["after:at_server_init"]);
    }

    #[test]
    fn hook_names_are_unique() {
        let mut names: Vec<_> = ServerHook::ALL.iter().map(|h| h.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ServerHook::ALL.len());
    }
}

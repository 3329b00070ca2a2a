use std::collections::HashMap;
use std::path::Path;

use mlua::{Function, Lua, RegistryKey, Table};

use crate::api::log::register_log_api;
use crate::error::ScriptError;
use crate::hooks::{ServerHook, StartStopModule};
use crate::sandbox::{self, SandboxConfig};

/// A hook module written in Luau.
///
/// The chunk must return a table; any of its fields named after a
/// [`ServerHook`] (`at_server_start`, ...) that hold a function become that
/// hook. Other fields are ignored.
pub struct LuaHookModule {
    name: String,
    lua: Lua,
    config: SandboxConfig,
    hooks: HashMap<ServerHook, RegistryKey>,
}

impl LuaHookModule {
    pub fn from_source(name: impl Into<String>, source: &str, config: SandboxConfig) -> Result<Self, ScriptError> {
        let name = name.into();
        let lua = sandbox::create_sandboxed_lua(&config)?;
        register_log_api(&lua, &name)?;

        let table: Table = lua
            .load(source)
            .set_name(name.as_str())
            .eval()
            .map_err(|e| ScriptError::Load(format!("{name}: {e}")))?;

        let mut hooks = HashMap::new();
        for hook in ServerHook::ALL {
            if let Some(func) = table.get::<Option<Function>>(hook.name())? {
                hooks.insert(hook, lua.create_registry_value(func)?);
            }
        }

        tracing::info!(
            module = %name,
            hooks = hooks.len(),
            memory_limit_kb = config.memory_limit / 1024,
            "Lua hook module loaded"
        );
        Ok(Self {
            name,
            lua,
            config,
            hooks,
        })
    }

    /// Load a module from a file; the module name is the file stem.
    pub fn load_file(path: &Path, config: SandboxConfig) -> Result<Self, ScriptError> {
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("hook_module")
            .to_string();
        Self::from_source(name, &source, config)
    }
}

impl StartStopModule for LuaHookModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self, hook: ServerHook) -> bool {
        self.hooks.contains_key(&hook)
    }

    fn invoke(&mut self, hook: ServerHook) -> Result<(), ScriptError> {
        let Some(key) = self.hooks.get(&hook) else {
            return Ok(());
        };
        let func: Function = self.lua.registry_value(key)?;
        sandbox::arm_instruction_limit(&self.lua, self.config.instruction_limit);
        func.call::<()>(())?;
        Ok(())
    }
}

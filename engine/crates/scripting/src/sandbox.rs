use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mlua::Lua;

use crate::error::ScriptError;

/// Limits applied to every hook module VM.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Memory limit in bytes (default 16 MB).
    pub memory_limit: usize,
    /// Interrupt budget per hook call (default 1_000_000).
    pub instruction_limit: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 16 * 1024 * 1024,
            instruction_limit: 1_000_000,
        }
    }
}

/// Create a sandboxed Luau VM with memory and instruction limits.
pub fn create_sandboxed_lua(config: &SandboxConfig) -> Result<Lua, ScriptError> {
    let lua = Lua::new();
    lua.sandbox(true)?;
    lua.set_memory_limit(config.memory_limit)?;
    arm_instruction_limit(&lua, config.instruction_limit);
    Ok(lua)
}

/// Install a fresh interrupt counter. Called before each hook call so one
/// hook's budget does not leak into the next.
pub fn arm_instruction_limit(lua: &Lua, limit: u32) {
    let counter = Arc::new(AtomicU32::new(0));
    lua.set_interrupt(move |_| {
        if counter.fetch_add(1, Ordering::Relaxed) >= limit {
            return Err(mlua::Error::runtime("instruction limit exceeded"));
        }
        Ok(mlua::VmState::Continue)
    });
}

use mlua::{Lua, Result as LuaResult};

/// Install a `log` table (`info`, `warn`, `error`, `debug`) that forwards
/// to `tracing` under the `hook_module` target, tagged with the module name.
pub fn register_log_api(lua: &Lua, module: &str) -> LuaResult<()> {
    let log_table = lua.create_table()?;

    let name = module.to_string();
    log_table.set(
        "info",
        lua.create_function(move |_, msg: String| {
            tracing::info!(target: "hook_module", module = %name, "{}", msg);
            Ok(())
        })?,
    )?;

    let name = module.to_string();
    log_table.set(
        "warn",
        lua.create_function(move |_, msg: String| {
            tracing::warn!(target: "hook_module", module = %name, "{}", msg);
            Ok(())
        })?,
    )?;

    let name = module.to_string();
    log_table.set(
        "error",
        lua.create_function(move |_, msg: String| {
            tracing::error!(target: "hook_module", module = %name, "{}", msg);
            Ok(())
        })?,
    )?;

    let name = module.to_string();
    log_table.set(
        "debug",
        lua.create_function(move |_, msg: String| {
            tracing::debug!(target: "hook_module", module = %name, "{}", msg);
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log_table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{create_sandboxed_lua, SandboxConfig};

    #[test]
    fn log_functions_are_callable() {
        let lua = create_sandboxed_lua(&SandboxConfig::default()).unwrap();
        register_log_api(&lua, "startup").unwrap();
        lua.load(r#"log.info("info"); log.warn("warn"); log.error("error"); log.debug("debug")"#)
            .exec()
            .unwrap();
    }
}

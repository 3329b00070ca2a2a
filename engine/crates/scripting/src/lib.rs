pub mod api;
pub mod error;
pub mod hooks;
pub mod lua_module;
pub mod sandbox;

pub use error::ScriptError;
pub use hooks::{DispatchReport, FnModule, HookRegistry, ModuleFailure, ServerHook, StartStopModule};
pub use lua_module::LuaHookModule;
pub use sandbox::SandboxConfig;

mod config;
mod shutdown;

use std::path::Path;
use std::process::ExitCode;

use engine_core::{LifecycleController, LifecycleError};
use net::TcpPortalLink;
use persistence::{Database, SqliteConfigStore};
use scripting::{HookRegistry, LuaHookModule};
use world::{TypeclassRegistry, World};

use crate::config::{parse_cli_args, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    observability::init_logging();

    let config = parse_cli_args();
    tracing::info!("Game server starting...");

    match run_server(config).await {
        Ok(mode) => {
            tracing::info!(%mode, "Server stopped.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: ServerConfig) -> Result<net::RestartMode, LifecycleError> {
    let settings = config.to_lifecycle_settings()?;
    let hooks = load_hook_modules(&config)?;

    let store_db = Database::open_location(&config.database.path)?;
    let world_db = Database::open_location(&config.database.path)?;
    tracing::info!(path = %config.database.path, "Database opened");
    let world = World::new(world_db, TypeclassRegistry::new());

    let (portal, inbound) = TcpPortalLink::connect(&config.portal.addr).await?;

    let (mut controller, exit) = LifecycleController::new(
        settings,
        Box::new(SqliteConfigStore::new(store_db)),
        world,
        hooks,
        Box::new(portal),
    );

    let (stop_tx, stop_rx) = tokio::sync::mpsc::unbounded_channel();
    let signals = shutdown::forward_signals(config.server.signal_mode, stop_tx, exit.clone());

    let outcome = controller.run(inbound, stop_rx).await;
    if exit.signalled().is_none() {
        signals.abort();
    }
    let _ = signals.await;
    log_status(&controller);
    outcome
}

fn load_hook_modules(config: &ServerConfig) -> Result<HookRegistry, LifecycleError> {
    let mut hooks = HookRegistry::new();
    for path in &config.hooks.modules {
        let module = LuaHookModule::load_file(Path::new(path), config.to_sandbox_config())
            .map_err(|e| LifecycleError::Config(format!("hook module {path}: {e}")))?;
        hooks.register(Box::new(module));
    }
    Ok(hooks)
}

fn log_status(controller: &LifecycleController) {
    match serde_json::to_string(controller.status()) {
        Ok(json) => tracing::info!(server = %controller.settings().servername, status = %json, "Final status"),
        Err(e) => tracing::warn!(error = %e, "Could not serialize status"),
    }
}

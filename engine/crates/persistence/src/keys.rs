//! Server-config keys used to coordinate restarts.

/// Accumulated server runtime in seconds (f64).
pub const RUNTIME: &str = "runtime";

/// Progress marker of the one-time initial setup.
pub const LAST_INITIAL_SETUP_STEP: &str = "last_initial_setup_step";

/// Mode the server was last stopped in ("reload" or "reset").
pub const SERVER_RESTART_MODE: &str = "server_restart_mode";

/// Present while the server is between process start and post-sync init.
pub const SERVER_STARTING_MODE: &str = "server_starting_mode";

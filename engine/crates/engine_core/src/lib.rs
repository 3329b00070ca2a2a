pub mod clock;
pub mod defaults;
pub mod error;
pub mod exit;
pub mod initial_setup;
pub mod lifecycle;
pub mod maintenance;
pub mod settings;
pub mod status;
pub mod tasks;

pub use clock::RuntimeClock;
pub use defaults::{reconcile_defaults, ReconcileReport, TypeclassDefaults, DEFAULT_SETTINGS};
pub use error::LifecycleError;
pub use exit::{exit_channel, ExitRx, ExitTx};
pub use initial_setup::{InitialSetup, SetupContext, SetupOutcome};
pub use lifecycle::{LifecycleController, LifecycleState, StopRx, StopTx};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceContext};
pub use settings::{ChannelSpec, LifecycleSettings};
pub use status::ServerStatus;
pub use tasks::{DelayedTask, MonitorEntry, SchedulerState, TickerEntry};

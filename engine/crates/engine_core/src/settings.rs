use std::path::PathBuf;
use std::time::Duration;

use crate::defaults::TypeclassDefaults;
use crate::maintenance::MaintenanceConfig;
use net::RestartMode;

/// A channel the server makes sure exists after every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub key: String,
    pub description: String,
    pub typeclass_path: Option<String>,
    /// Subscribe the superuser account when the channel is created.
    pub connect_superuser: bool,
}

impl ChannelSpec {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            typeclass_path: None,
            connect_superuser: true,
        }
    }
}

/// Everything the lifecycle controller needs from configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub servername: String,
    pub version: String,
    pub maintenance: MaintenanceConfig,
    /// Upper bound on the shutdown session push.
    pub sync_timeout: Duration,
    /// Directory for scheduler state files.
    pub state_dir: PathBuf,
    pub typeclass_defaults: TypeclassDefaults,
    /// Guest account typeclass. `None` disables the guest purge.
    pub guest_typeclass: Option<String>,
    pub default_channels: Vec<ChannelSpec>,
    pub superuser_name: String,
    /// Start mode used when the Portal announces none. Takes precedence
    /// over the stored restart marker.
    pub start_mode_override: Option<RestartMode>,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            servername: "evergreen".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            maintenance: MaintenanceConfig::default(),
            sync_timeout: Duration::from_secs(10),
            state_dir: PathBuf::from("data/state"),
            typeclass_defaults: TypeclassDefaults::default(),
            guest_typeclass: None,
            default_channels: vec![
                ChannelSpec::new("MudInfo", "Connection log"),
                ChannelSpec::new("ConnectInfo", "Connection info"),
                ChannelSpec::new("Public", "Public discussion"),
            ],
            superuser_name: "admin".to_string(),
            start_mode_override: None,
        }
    }
}

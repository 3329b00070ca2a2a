use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use engine_core::{ChannelSpec, LifecycleError, LifecycleSettings, MaintenanceConfig, TypeclassDefaults};
use net::RestartMode;
use scripting::SandboxConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub servername: String,
    pub version: String,
    pub state_dir: String,
    /// Mode used when SIGINT/SIGTERM stops the process.
    pub signal_mode: RestartMode,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            servername: "evergreen".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            state_dir: "data/state".to_string(),
            signal_mode: RestartMode::Reload,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalSection {
    pub addr: String,
    pub sync_timeout_secs: u64,
}

impl Default for PortalSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4005".to_string(),
            sync_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: "data/server.db3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub period_secs: u64,
    pub cache_check_interval: u64,
    pub reconnect_interval: u64,
    /// Seconds; zero or less disables the idle sweep.
    pub idle_timeout_secs: f64,
    pub cache_max_size: usize,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            period_secs: 60,
            cache_check_interval: 5,
            reconnect_interval: 420, // 7 hours at the default period
            idle_timeout_secs: 3600.0,
            cache_max_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HookSection {
    /// Lua hook modules, dispatched in this order.
    pub modules: Vec<String>,
    pub memory_limit_kb: usize,
    pub instruction_limit: u32,
}

impl Default for HookSection {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            memory_limit_kb: 16384, // 16 MB
            instruction_limit: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[allow(non_snake_case)]
pub struct TypeclassSection {
    pub CMDSET_CHARACTER: Option<String>,
    pub CMDSET_ACCOUNT: Option<String>,
    pub BASE_ACCOUNT_TYPECLASS: Option<String>,
    pub BASE_OBJECT_TYPECLASS: Option<String>,
    pub BASE_CHARACTER_TYPECLASS: Option<String>,
    pub BASE_ROOM_TYPECLASS: Option<String>,
    pub BASE_EXIT_TYPECLASS: Option<String>,
    pub BASE_SCRIPT_TYPECLASS: Option<String>,
    pub BASE_CHANNEL_TYPECLASS: Option<String>,
    pub BASE_GUEST_TYPECLASS: String,
}

impl Default for TypeclassSection {
    fn default() -> Self {
        Self {
            CMDSET_CHARACTER: None,
            CMDSET_ACCOUNT: None,
            BASE_ACCOUNT_TYPECLASS: None,
            BASE_OBJECT_TYPECLASS: None,
            BASE_CHARACTER_TYPECLASS: None,
            BASE_ROOM_TYPECLASS: None,
            BASE_EXIT_TYPECLASS: None,
            BASE_SCRIPT_TYPECLASS: None,
            BASE_CHANNEL_TYPECLASS: None,
            BASE_GUEST_TYPECLASS: "typeclasses.accounts.Guest".to_string(),
        }
    }
}

impl TypeclassSection {
    fn overrides(&self) -> [(&'static str, &Option<String>); 9] {
        [
            ("CMDSET_CHARACTER", &self.CMDSET_CHARACTER),
            ("CMDSET_ACCOUNT", &self.CMDSET_ACCOUNT),
            ("BASE_ACCOUNT_TYPECLASS", &self.BASE_ACCOUNT_TYPECLASS),
            ("BASE_OBJECT_TYPECLASS", &self.BASE_OBJECT_TYPECLASS),
            ("BASE_CHARACTER_TYPECLASS", &self.BASE_CHARACTER_TYPECLASS),
            ("BASE_ROOM_TYPECLASS", &self.BASE_ROOM_TYPECLASS),
            ("BASE_EXIT_TYPECLASS", &self.BASE_EXIT_TYPECLASS),
            ("BASE_SCRIPT_TYPECLASS", &self.BASE_SCRIPT_TYPECLASS),
            ("BASE_CHANNEL_TYPECLASS", &self.BASE_CHANNEL_TYPECLASS),
        ]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GuestSection {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelEntry {
    pub key: String,
    pub description: String,
    pub typeclass: Option<String>,
    pub connect_superuser: bool,
}

impl Default for ChannelEntry {
    fn default() -> Self {
        Self {
            key: String::new(),
            description: String::new(),
            typeclass: None,
            connect_superuser: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    pub mudinfo: String,
    pub connectinfo: String,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            mudinfo: "MudInfo".to_string(),
            connectinfo: "ConnectInfo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SetupSection {
    pub superuser: String,
}

impl Default for SetupSection {
    fn default() -> Self {
        Self {
            superuser: "admin".to_string(),
        }
    }
}

/// Top-level game server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub portal: PortalSection,
    pub database: DatabaseSection,
    pub maintenance: MaintenanceSection,
    pub hooks: HookSection,
    pub typeclasses: TypeclassSection,
    pub guest: GuestSection,
    pub channel_keys: ChannelSection,
    pub channels: Vec<ChannelEntry>,
    pub setup: SetupSection,
    /// Set from `--mode`, never from the file.
    #[serde(skip)]
    pub start_mode: Option<RestartMode>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            portal: PortalSection::default(),
            database: DatabaseSection::default(),
            maintenance: MaintenanceSection::default(),
            hooks: HookSection::default(),
            typeclasses: TypeclassSection::default(),
            guest: GuestSection::default(),
            channel_keys: ChannelSection::default(),
            channels: vec![ChannelEntry {
                key: "Public".to_string(),
                description: "Public discussion".to_string(),
                ..ChannelEntry::default()
            }],
            setup: SetupSection::default(),
            start_mode: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional TOML file path.
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match config_path {
            Some(path) if Path::new(path).exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        Ok(config)
    }

    pub fn to_maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            period: Duration::from_secs(self.maintenance.period_secs.max(1)),
            cache_check_interval: self.maintenance.cache_check_interval,
            reconnect_interval: self.maintenance.reconnect_interval,
            idle_timeout: self.maintenance.idle_timeout_secs,
            cache_max_size: self.maintenance.cache_max_size,
        }
    }

    /// Convert into engine_core's LifecycleSettings.
    pub fn to_lifecycle_settings(&self) -> Result<LifecycleSettings, LifecycleError> {
        let mut typeclass_defaults = TypeclassDefaults::default();
        for (name, value) in self.typeclasses.overrides() {
            if let Some(value) = value {
                typeclass_defaults.set(name, value.clone())?;
            }
        }

        let mut default_channels = vec![
            ChannelSpec::new(&self.channel_keys.mudinfo, "Connection log"),
            ChannelSpec::new(&self.channel_keys.connectinfo, "Connection info"),
        ];
        default_channels.extend(self.channels.iter().filter(|c| !c.key.is_empty()).map(|c| ChannelSpec {
            key: c.key.clone(),
            description: c.description.clone(),
            typeclass_path: c.typeclass.clone(),
            connect_superuser: c.connect_superuser,
        }));

        Ok(LifecycleSettings {
            servername: self.server.servername.clone(),
            version: self.server.version.clone(),
            maintenance: self.to_maintenance_config(),
            sync_timeout: Duration::from_secs(self.portal.sync_timeout_secs),
            state_dir: PathBuf::from(&self.server.state_dir),
            typeclass_defaults,
            guest_typeclass: self
                .guest
                .enabled
                .then(|| self.typeclasses.BASE_GUEST_TYPECLASS.clone()),
            default_channels,
            superuser_name: self.setup.superuser.clone(),
            start_mode_override: self.start_mode,
        })
    }

    /// Convert hook section to scripting crate's SandboxConfig.
    pub fn to_sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            memory_limit: self.hooks.memory_limit_kb * 1024,
            instruction_limit: self.hooks.instruction_limit,
        }
    }
}

/// Parse CLI arguments and load config.
/// Supports: --config <path>, --mode <reload|reset|shutdown>
pub fn parse_cli_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<&str> = None;
    let mut start_mode: Option<RestartMode> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(val) = args.get(i + 1) {
                    config_path = Some(val.as_str());
                    i += 2;
                } else {
                    eprintln!("--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--mode" => match args.get(i + 1).map(|v| v.parse::<RestartMode>()) {
                Some(Ok(mode)) => {
                    start_mode = Some(mode);
                    i += 2;
                }
                Some(Err(e)) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
                None => {
                    eprintln!("--mode requires one of reload, reset, shutdown");
                    std::process::exit(1);
                }
            },
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    match ServerConfig::load(config_path) {
        Ok(mut c) => {
            c.start_mode = start_mode;
            c
        }
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

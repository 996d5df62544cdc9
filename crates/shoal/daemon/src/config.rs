//! Configuration for shoald

use serde::{Deserialize, Serialize};

use shoal_control::RetryQueueConfig;
use shoal_health::GuardConfig;
use shoal_membership::ReconfigConfig;
use shoal_provision::ProvisionConfig;
use shoal_tls::TlsConfig;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Identity of the unit this process drives
    #[serde(default)]
    pub unit: UnitConfig,

    /// Replica-set membership
    #[serde(default)]
    pub reconfig: ReconfigConfig,

    /// Client relation provisioning
    #[serde(default)]
    pub provision: ProvisionConfig,

    /// Certificate renewal and removal fallback
    #[serde(default)]
    pub tls: TlsConfig,

    /// Replay of deferred events
    #[serde(default)]
    pub retries: RetryQueueConfig,

    /// Retry and breaker settings per external boundary
    #[serde(default)]
    pub guards: GuardsConfig,

    /// Control-loop timing
    #[serde(default)]
    pub driver: DriverConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unit name, e.g. `shoal/0`
    pub name: String,

    /// Address peers and clients reach this unit on
    pub address: String,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            name: "shoal/0".to_string(),
            address: "127.0.0.1:27017".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardsConfig {
    #[serde(default)]
    pub engine: GuardConfig,
    #[serde(default)]
    pub certificate_authority: GuardConfig,
    #[serde(default)]
    pub object_storage: GuardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Seconds between update-status triggers
    #[serde(default = "default_update_status_interval")]
    pub update_status_interval_secs: u64,

    /// Seconds between scans of the retry queue
    #[serde(default = "default_retry_poll_interval")]
    pub retry_poll_interval_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            update_status_interval_secs: default_update_status_interval(),
            retry_poll_interval_secs: default_retry_poll_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_update_status_interval() -> u64 {
    300
}

fn default_retry_poll_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `SHOAL_*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SHOAL")
                .separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

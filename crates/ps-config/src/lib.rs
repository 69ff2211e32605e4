//! Platform Service Configuration
//!
//! TOML-based configuration with environment variable overrides. Every section
//! has defaults, so an empty file (or no file at all) yields a runnable
//! development setup.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub replication: ReplicationConfig,
    pub channel: ChannelConfig,
    pub publish: PublishConfig,
    pub relay: RelayConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Port of the separate metrics/health listener
    pub metrics_port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_port: 9090,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Local relational storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://platforms.db?mode=rwc`
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://platforms.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Best-effort synchronous replication to the peer service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub enabled: bool,
    /// Full URL the platform view is POSTed to
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:6000/api/c/platforms".to_string(),
            connect_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl ReplicationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Asynchronous event channel endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// URL creation events are POSTed to
    pub endpoint: String,
    /// Optional Bearer token
    pub api_token: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8081/api/events".to_string(),
            api_token: None,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How a creation event reaches the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Publish inside the request transaction; commit only after delivery
    #[default]
    Direct,
    /// Write an outbox row in the request transaction; a relay publishes later
    Outbox,
}

impl std::str::FromStr for DeliveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(DeliveryMode::Direct),
            "outbox" => Ok(DeliveryMode::Outbox),
            other => Err(ConfigError::ValidationError(format!(
                "unknown publish mode '{}', expected 'direct' or 'outbox'",
                other
            ))),
        }
    }
}

/// Publish retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub mode: DeliveryMode,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Direct,
            max_attempts: 5,
            base_delay_ms: 1000,
        }
    }
}

impl PublishConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Outbox relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Run the relay inside the platform server process
    pub embedded: bool,
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    /// Relay passes (each a full publish retry cycle) before a row is marked failed
    pub max_relay_attempts: i32,
    pub recovery_interval_secs: u64,
    /// Age after which an IN_PROGRESS row is considered abandoned
    pub stuck_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            embedded: true,
            poll_interval_ms: 1000,
            batch_size: 50,
            max_relay_attempts: 10,
            recovery_interval_secs: 60,
            stuck_timeout_secs: 300,
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the standard locations with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::ValidationError("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError("database.max_connections must be at least 1".into()));
        }
        if self.publish.max_attempts == 0 {
            return Err(ConfigError::ValidationError("publish.max_attempts must be at least 1".into()));
        }
        if self.channel.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError("channel.endpoint must not be empty".into()));
        }
        if self.replication.enabled && self.replication.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "replication.endpoint must be set when replication is enabled".into(),
            ));
        }
        if self.relay.batch_size == 0 {
            return Err(ConfigError::ValidationError("relay.batch_size must be at least 1".into()));
        }
        if self.relay.max_relay_attempts < 1 {
            return Err(ConfigError::ValidationError("relay.max_relay_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Platform Service Configuration
# Environment variables (PLATFORM_SERVICE_*) override these settings

[http]
host = "0.0.0.0"
port = 8080
metrics_port = 9090
cors_origins = ["*"]

[database]
url = "sqlite://platforms.db?mode=rwc"
max_connections = 5

# Best-effort synchronous copy to the peer service
[replication]
enabled = true
endpoint = "http://localhost:6000/api/c/platforms"
connect_timeout_ms = 2000
request_timeout_ms = 5000

# Asynchronous event channel
[channel]
endpoint = "http://localhost:8081/api/events"
# api_token = "secret"
connect_timeout_ms = 10000
request_timeout_ms = 30000

# mode: "direct" (publish before commit) or "outbox" (commit first, relay publishes)
[publish]
mode = "direct"
max_attempts = 5
base_delay_ms = 1000

[relay]
embedded = true
poll_interval_ms = 1000
batch_size = 50
max_relay_attempts = 10
recovery_interval_secs = 60
stuck_timeout_secs = 300
"#
        .to_string()
    }
}

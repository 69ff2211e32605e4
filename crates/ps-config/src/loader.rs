//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "platform-service.toml",
    "./config/config.toml",
    "/etc/platform-service/config.toml",
];

/// Environment variable naming an explicit config file
const CONFIG_PATH_VAR: &str = "PLATFORM_SERVICE_CONFIG";

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found), apply environment overrides and validate.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.find_config_file(&lookup) {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => AppConfig::default(),
        };

        apply_overrides(&mut config, &lookup)?;
        config.validate()?;

        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured file does not exist, searching defaults");
        }

        if let Some(path) = lookup(CONFIG_PATH_VAR).map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(None),
    }
}

/// Apply `PLATFORM_SERVICE_*` overrides on top of file or default values.
fn apply_overrides<F>(config: &mut AppConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(val) = lookup("PLATFORM_SERVICE_HTTP_HOST") {
        config.http.host = val;
    }
    if let Some(port) = parse_var(lookup, "PLATFORM_SERVICE_HTTP_PORT")? {
        config.http.port = port;
    }
    if let Some(port) = parse_var(lookup, "PLATFORM_SERVICE_METRICS_PORT")? {
        config.http.metrics_port = port;
    }
    if let Some(val) = lookup("PLATFORM_SERVICE_CORS_ORIGINS") {
        config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
    }

    // Database
    if let Some(val) = lookup("PLATFORM_SERVICE_DATABASE_URL") {
        config.database.url = val;
    }
    if let Some(n) = parse_var(lookup, "PLATFORM_SERVICE_DATABASE_MAX_CONNECTIONS")? {
        config.database.max_connections = n;
    }

    // Replication
    if let Some(enabled) = parse_var(lookup, "PLATFORM_SERVICE_REPLICATION_ENABLED")? {
        config.replication.enabled = enabled;
    }
    if let Some(val) = lookup("PLATFORM_SERVICE_REPLICATION_ENDPOINT") {
        config.replication.endpoint = val;
    }

    // Channel
    if let Some(val) = lookup("PLATFORM_SERVICE_CHANNEL_ENDPOINT") {
        config.channel.endpoint = val;
    }
    if let Some(val) = lookup("PLATFORM_SERVICE_CHANNEL_TOKEN") {
        config.channel.api_token = Some(val);
    }

    // Publish
    if let Some(mode) = parse_var(lookup, "PLATFORM_SERVICE_PUBLISH_MODE")? {
        config.publish.mode = mode;
    }
    if let Some(n) = parse_var(lookup, "PLATFORM_SERVICE_PUBLISH_MAX_ATTEMPTS")? {
        config.publish.max_attempts = n;
    }
    if let Some(ms) = parse_var(lookup, "PLATFORM_SERVICE_PUBLISH_BASE_DELAY_MS")? {
        config.publish.base_delay_ms = ms;
    }

    // Relay
    if let Some(embedded) = parse_var(lookup, "PLATFORM_SERVICE_RELAY_EMBEDDED")? {
        config.relay.embedded = embedded;
    }
    if let Some(ms) = parse_var(lookup, "PLATFORM_SERVICE_RELAY_POLL_INTERVAL_MS")? {
        config.relay.poll_interval_ms = ms;
    }
    if let Some(n) = parse_var(lookup, "PLATFORM_SERVICE_RELAY_BATCH_SIZE")? {
        config.relay.batch_size = n;
    }

    Ok(())
}

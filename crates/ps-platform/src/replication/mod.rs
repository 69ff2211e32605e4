//! Synchronous Replication
//!
//! Best-effort mirror of a new platform to a peer service. The orchestrator
//! observes failures and moves on; nothing here is ever retried.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::platform::PlatformView;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("peer responded with HTTP {status}")]
    Status { status: u16 },

    #[error("replication request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("replication unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SyncReplicationClient: Send + Sync {
    async fn send_platform(&self, platform: &PlatformView) -> Result<(), ReplicationError>;
}

/// HTTP replication client configuration
#[derive(Debug, Clone)]
pub struct HttpReplicationConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpReplicationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:6000/api/c/platforms".to_string(),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// POSTs the platform view as JSON to the peer endpoint.
pub struct HttpReplicationClient {
    config: HttpReplicationConfig,
    client: reqwest::Client,
}

impl HttpReplicationClient {
    pub fn new(config: HttpReplicationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl SyncReplicationClient for HttpReplicationClient {
    async fn send_platform(&self, platform: &PlatformView) -> Result<(), ReplicationError> {
        debug!(platform_id = platform.id, url = %self.config.endpoint, "Replicating platform");

        let response = self.client.post(&self.config.endpoint).json(platform).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplicationError::Status { status: status.as_u16() });
        }
        Ok(())
    }
}

/// Used when replication is switched off in configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledReplication;

#[async_trait]
impl SyncReplicationClient for DisabledReplication {
    async fn send_platform(&self, _platform: &PlatformView) -> Result<(), ReplicationError> {
        Ok(())
    }
}

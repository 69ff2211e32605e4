//! Platform Event Outbox
//!
//! Delivery of `Platform_Published` events to the message channel:
//! - [`AsyncEventPublisher`]: bounded retry with exponential backoff
//! - [`OutboxRelay`]: publishes rows committed next to their platform
//! - [`RecoveryTask`]: returns rows abandoned IN_PROGRESS to PENDING

pub mod repository;
pub mod recovery;
pub mod channel;
pub mod publisher;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use ps_common::{Observation, Observer, OutboxItem, OutboxStatus};
use anyhow::Result;
use tracing::{info, debug};

pub use repository::{OutboxRepository, OUTBOX_TABLE};
pub use recovery::{RecoveryTask, RecoveryConfig};
pub use channel::{ChannelError, HttpChannel, HttpChannelConfig, MessageChannel};
pub use publisher::{AsyncEventPublisher, PublishError};

#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Relay passes (each a full publisher retry run) before a row is FAILED
    pub max_relay_attempts: i32,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            max_relay_attempts: 10,
        }
    }
}

/// Outcome counts of one relay batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub delivered: usize,
    pub deferred: usize,
    pub failed: usize,
    /// Interrupted by cancellation and returned to PENDING
    pub released: usize,
    /// Claimed by another relay between fetch and claim
    pub skipped: usize,
}

/// Moves committed outbox rows onto the message channel.
pub struct OutboxRelay {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<AsyncEventPublisher>,
    observer: Arc<dyn Observer>,
    config: OutboxRelayConfig,
}

impl OutboxRelay {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<AsyncEventPublisher>,
        observer: Arc<dyn Observer>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            observer,
            config,
        }
    }

    /// Poll and relay until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = %self.config.poll_interval.as_millis(),
            batch_size = %self.config.batch_size,
            max_relay_attempts = %self.config.max_relay_attempts,
            "Starting outbox relay"
        );

        while !cancel.is_cancelled() {
            if let Err(e) = self.process_batch(&cancel).await {
                self.observer.observe(Observation::RelayError { cause: e.to_string() });
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        info!("Outbox relay stopped");
    }

    /// Fetch one batch of PENDING rows and publish each in order.
    ///
    /// Each row is claimed only right before its own publish, so the claim
    /// timestamp the recovery task compares against covers a single retry
    /// cycle, and rows further down the batch stay PENDING for other relays.
    /// A row interrupted by `cancel` goes back to PENDING without counting as
    /// an attempt.
    pub async fn process_batch(&self, cancel: &CancellationToken) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();

        let items = self.repository.fetch_pending(self.config.batch_size).await?;

        for item in items {
            if cancel.is_cancelled() {
                break;
            }

            let claimed = self.repository.mark_in_progress(vec![item.id.clone()]).await?;
            if claimed.is_empty() {
                debug!(item_id = %item.id, "Outbox item claimed elsewhere, skipping");
                summary.skipped += 1;
                continue;
            }

            debug!(item_id = %item.id, retry_count = item.retry_count, "Relaying outbox item");

            match self.publisher.publish(&item.to_message(), cancel).await {
                Ok(attempts) => {
                    self.repository
                        .mark_with_status(vec![item.id.clone()], OutboxStatus::SUCCESS, None)
                        .await?;
                    self.observer.observe(Observation::RelayDelivered { item_id: item.id, attempts });
                    summary.delivered += 1;
                }
                Err(PublishError::Cancelled { .. }) => {
                    self.release(vec![item.id]).await?;
                    summary.released += 1;
                    break;
                }
                Err(e @ PublishError::Exhausted { .. }) => {
                    if self.record_failure(&item, e.to_string()).await? {
                        summary.failed += 1;
                    } else {
                        summary.deferred += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Count a failed pass; returns true when the row was marked FAILED.
    async fn record_failure(&self, item: &OutboxItem, cause: String) -> Result<bool> {
        let retry_count = item.retry_count + 1;
        self.repository
            .increment_retry_count(vec![item.id.clone()], Some(cause.clone()))
            .await?;

        if retry_count >= self.config.max_relay_attempts {
            self.repository
                .mark_with_status(vec![item.id.clone()], OutboxStatus::FAILED, Some(cause.clone()))
                .await?;
            self.observer.observe(Observation::RelayGaveUp {
                item_id: item.id.clone(),
                retry_count,
                cause,
            });
            return Ok(true);
        }

        self.observer.observe(Observation::RelayDeferred {
            item_id: item.id.clone(),
            retry_count,
            cause,
        });
        Ok(false)
    }

    async fn release(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.repository.mark_with_status(ids, OutboxStatus::PENDING, None).await
    }
}

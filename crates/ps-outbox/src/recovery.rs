//! Crash recovery for stuck outbox items.
//!
//! A relay that dies between claiming a row and recording the outcome leaves
//! the row IN_PROGRESS. This task periodically puts such rows back to PENDING.

use std::sync::Arc;
use std::time::Duration;
use ps_common::{Observation, Observer};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, debug};
use crate::repository::OutboxRepository;

/// Configuration for the crash recovery task.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to check for stuck items. Default: 60 seconds.
    pub check_interval: Duration,
    /// How long an item can be IN_PROGRESS before it's considered stuck.
    /// Default: 5 minutes.
    pub stuck_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            stuck_timeout: Duration::from_secs(300),
        }
    }
}

pub struct RecoveryTask {
    repository: Arc<dyn OutboxRepository>,
    config: RecoveryConfig,
    observer: Arc<dyn Observer>,
}

impl RecoveryTask {
    pub fn new(repository: Arc<dyn OutboxRepository>, config: RecoveryConfig, observer: Arc<dyn Observer>) -> Self {
        Self { repository, config, observer }
    }

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval = ?self.config.check_interval,
            timeout = ?self.config.stuck_timeout,
            "Starting outbox recovery task"
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.recover_once().await;
                }
            }
        }

        info!("Outbox recovery task stopped");
    }

    /// Perform a single recovery check, returning how many items were reset.
    pub async fn recover_once(&self) -> u64 {
        debug!("Checking for stuck outbox items");
        match self.repository.recover_stuck_items(self.config.stuck_timeout).await {
            Ok(count) => {
                if count > 0 {
                    self.observer.observe(Observation::StuckItemsRecovered { count });
                }
                count
            }
            Err(e) => {
                self.observer.observe(Observation::RelayError {
                    cause: format!("stuck item recovery failed: {e}"),
                });
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use ps_common::testing::RecordingObserver;
    use ps_common::{OutboxItem, OutboxStatus};

    struct StuckRepository {
        stuck: u64,
        fail: bool,
    }

    #[async_trait]
    impl OutboxRepository for StuckRepository {
        async fn fetch_pending(&self, _limit: u32) -> Result<Vec<OutboxItem>> {
            Ok(vec![])
        }
        async fn mark_in_progress(&self, ids: Vec<String>) -> Result<Vec<String>> {
            Ok(ids)
        }
        async fn mark_with_status(&self, _ids: Vec<String>, _status: OutboxStatus, _e: Option<String>) -> Result<()> {
            Ok(())
        }
        async fn increment_retry_count(&self, _ids: Vec<String>, _e: Option<String>) -> Result<()> {
            Ok(())
        }
        async fn fetch_stuck_items(&self, _timeout: Duration, _limit: u32) -> Result<Vec<OutboxItem>> {
            Ok(vec![])
        }
        async fn reset_stuck_items(&self, _ids: Vec<String>) -> Result<()> {
            Ok(())
        }
        async fn find_by_id(&self, _id: &str) -> Result<Option<OutboxItem>> {
            Ok(None)
        }
        async fn recover_stuck_items(&self, _timeout: Duration) -> Result<u64> {
            if self.fail {
                anyhow::bail!("database is locked");
            }
            Ok(self.stuck)
        }
        async fn init_schema(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_config() {
        let config = RecoveryConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.stuck_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_recovered_items_are_observed() {
        let observer = Arc::new(RecordingObserver::new());
        let task = RecoveryTask::new(
            Arc::new(StuckRepository { stuck: 3, fail: false }),
            RecoveryConfig::default(),
            observer.clone(),
        );

        assert_eq!(task.recover_once().await, 3);
        assert!(observer.contains(|o| matches!(o, Observation::StuckItemsRecovered { count: 3 })));
    }

    #[tokio::test]
    async fn test_repository_failure_is_reported_not_raised() {
        let observer = Arc::new(RecordingObserver::new());
        let task = RecoveryTask::new(
            Arc::new(StuckRepository { stuck: 0, fail: true }),
            RecoveryConfig::default(),
            observer.clone(),
        );

        assert_eq!(task.recover_once().await, 0);
        assert!(observer.contains(|o| matches!(o, Observation::RelayError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let task = RecoveryTask::new(
            Arc::new(StuckRepository { stuck: 0, fail: false }),
            RecoveryConfig::default(),
            Arc::new(RecordingObserver::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task.run(cancel))
            .await
            .unwrap();
    }
}

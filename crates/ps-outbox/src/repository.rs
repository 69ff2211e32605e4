//! Outbox Repository Trait
//!
//! Persistence interface the relay and the recovery task work against.
//! Rows move PENDING -> IN_PROGRESS -> SUCCESS, or back to PENDING with a
//! bumped retry count, or to FAILED once the relay gives up.

use async_trait::async_trait;
use ps_common::{OutboxItem, OutboxStatus};
use anyhow::Result;
use std::time::Duration;

/// Name of the table holding outbox rows
pub const OUTBOX_TABLE: &str = "outbox_events";

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Fetch PENDING items, oldest first
    async fn fetch_pending(&self, limit: u32) -> Result<Vec<OutboxItem>>;

    /// Claim PENDING items by moving them to IN_PROGRESS
    ///
    /// Returns the ids actually claimed; items another relay took in the
    /// meantime are left out.
    async fn mark_in_progress(&self, ids: Vec<String>) -> Result<Vec<String>>;

    /// Update status for items with optional error message
    async fn mark_with_status(
        &self,
        ids: Vec<String>,
        status: OutboxStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Increment retry count and reset to PENDING for retry
    async fn increment_retry_count(&self, ids: Vec<String>, error_message: Option<String>) -> Result<()>;

    /// Fetch items stuck in IN_PROGRESS for longer than timeout
    async fn fetch_stuck_items(&self, timeout: Duration, limit: u32) -> Result<Vec<OutboxItem>>;

    /// Reset stuck items back to PENDING
    async fn reset_stuck_items(&self, ids: Vec<String>) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<OutboxItem>>;

    /// Recover stuck items, returning how many were reset
    async fn recover_stuck_items(&self, timeout: Duration) -> Result<u64> {
        let stuck = self.fetch_stuck_items(timeout, 1000).await?;
        if stuck.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = stuck.into_iter().map(|i| i.id).collect();
        let count = ids.len() as u64;
        self.reset_stuck_items(ids).await?;
        Ok(count)
    }

    /// Initialize schema (create tables if not exists)
    async fn init_schema(&self) -> Result<()>;
}

//! SQLite Outbox Repository Implementation
//!
//! Rows are written by [`enqueue`] inside the caller's own transaction, so an
//! outbox entry exists exactly when the business rows it describes do.

use async_trait::async_trait;
use ps_common::{OutboxItem, OutboxStatus};
use crate::repository::{OutboxRepository, OUTBOX_TABLE};
use anyhow::Result;
use sqlx::{Row, Sqlite, SqlitePool};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, debug};

const SELECT_COLUMNS: &str =
    "id, event_type, aggregate_id, payload, status, retry_count, error_message, created_at, updated_at";

/// Insert a PENDING outbox row using the given executor.
///
/// Pass a transaction connection to make the insert part of that transaction.
pub async fn enqueue<'e, E>(executor: E, item: &OutboxItem) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "INSERT INTO {} (id, event_type, aggregate_id, payload, status, retry_count, error_message, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        OUTBOX_TABLE
    );

    sqlx::query(&query)
        .bind(&item.id)
        .bind(&item.event_type)
        .bind(&item.aggregate_id)
        .bind(item.payload.to_string())
        .bind(item.status.code())
        .bind(item.retry_count)
        .bind(&item.error_message)
        .bind(item.created_at.timestamp_millis())
        .bind(item.updated_at.map(|t| t.timestamp_millis()))
        .execute(executor)
        .await?;

    Ok(())
}

/// SQLite implementation of OutboxRepository
pub struct SqliteOutboxRepository {
    pool: SqlitePool,
}

impl SqliteOutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Build a query with the appropriate number of placeholders for IN clause
    fn build_in_clause(count: usize) -> String {
        let placeholders: Vec<&str> = (0..count).map(|_| "?").collect();
        placeholders.join(", ")
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxItem> {
        let created_at_ts: i64 = row.get("created_at");
        let created_at = DateTime::from_timestamp_millis(created_at_ts)
            .ok_or_else(|| anyhow::anyhow!("Invalid created_at timestamp"))?;

        let updated_at_ts: Option<i64> = row.try_get("updated_at").ok().flatten();
        let updated_at = updated_at_ts.and_then(DateTime::from_timestamp_millis);

        Ok(OutboxItem {
            id: row.get("id"),
            event_type: row.get("event_type"),
            aggregate_id: row.get("aggregate_id"),
            payload: serde_json::from_str(row.get("payload"))?,
            status: OutboxStatus::from_code(row.get("status")),
            retry_count: row.get::<i32, _>("retry_count"),
            error_message: row.try_get("error_message").ok().flatten(),
            created_at,
            updated_at,
        })
    }

    fn parse_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<OutboxItem>> {
        rows.iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutboxRepository {
    async fn fetch_pending(&self, limit: u32) -> Result<Vec<OutboxItem>> {
        let query = format!(
            "SELECT {} FROM {} WHERE status = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
            SELECT_COLUMNS, OUTBOX_TABLE
        );

        let rows = sqlx::query(&query)
            .bind(OutboxStatus::PENDING.code())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let items = Self::parse_rows(&rows)?;
        debug!(count = items.len(), "Fetched pending outbox items");
        Ok(items)
    }

    async fn mark_in_progress(&self, ids: Vec<String>) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(ids);
        }

        let now = Utc::now().timestamp_millis();
        let query = format!(
            "UPDATE {} SET status = ?, updated_at = ? WHERE status = ? AND id IN ({}) RETURNING id",
            OUTBOX_TABLE,
            Self::build_in_clause(ids.len())
        );

        let mut q = sqlx::query(&query)
            .bind(OutboxStatus::IN_PROGRESS.code())
            .bind(now)
            .bind(OutboxStatus::PENDING.code());
        for id in &ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        let claimed: Vec<String> = rows.iter().map(|r| r.get("id")).collect();

        debug!(requested = ids.len(), claimed = claimed.len(), "Marked items as IN_PROGRESS");
        Ok(claimed)
    }

    async fn mark_with_status(
        &self,
        ids: Vec<String>,
        status: OutboxStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp_millis();
        let query = format!(
            "UPDATE {} SET status = ?, error_message = ?, updated_at = ? WHERE id IN ({})",
            OUTBOX_TABLE,
            Self::build_in_clause(ids.len())
        );

        let mut q = sqlx::query(&query)
            .bind(status.code())
            .bind(&error_message)
            .bind(now);
        for id in &ids {
            q = q.bind(id);
        }
        q.execute(&self.pool).await?;

        debug!(status = %status, count = ids.len(), "Marked items with status");
        Ok(())
    }

    async fn increment_retry_count(&self, ids: Vec<String>, error_message: Option<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp_millis();
        let query = format!(
            "UPDATE {} SET retry_count = retry_count + 1, status = ?, error_message = ?, updated_at = ? WHERE id IN ({})",
            OUTBOX_TABLE,
            Self::build_in_clause(ids.len())
        );

        let mut q = sqlx::query(&query)
            .bind(OutboxStatus::PENDING.code())
            .bind(&error_message)
            .bind(now);
        for id in &ids {
            q = q.bind(id);
        }
        q.execute(&self.pool).await?;

        debug!(count = ids.len(), "Incremented retry count");
        Ok(())
    }

    async fn fetch_stuck_items(&self, timeout: Duration, limit: u32) -> Result<Vec<OutboxItem>> {
        let cutoff = Utc::now().timestamp_millis() - timeout.as_millis() as i64;
        let query = format!(
            "SELECT {} FROM {} WHERE status = ? AND updated_at < ? ORDER BY created_at ASC LIMIT ?",
            SELECT_COLUMNS, OUTBOX_TABLE
        );

        let rows = sqlx::query(&query)
            .bind(OutboxStatus::IN_PROGRESS.code())
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Self::parse_rows(&rows)
    }

    async fn reset_stuck_items(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp_millis();
        let query = format!(
            "UPDATE {} SET status = ?, updated_at = ? WHERE status = ? AND id IN ({})",
            OUTBOX_TABLE,
            Self::build_in_clause(ids.len())
        );

        let mut q = sqlx::query(&query)
            .bind(OutboxStatus::PENDING.code())
            .bind(now)
            .bind(OutboxStatus::IN_PROGRESS.code());
        for id in &ids {
            q = q.bind(id);
        }
        q.execute(&self.pool).await?;

        info!(count = ids.len(), "Reset stuck items to PENDING");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<OutboxItem>> {
        let query = format!("SELECT {} FROM {} WHERE id = ?", SELECT_COLUMNS, OUTBOX_TABLE);

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                aggregate_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(status);
            CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at);
            "#,
            table = OUTBOX_TABLE,
        );

        sqlx::query(&schema).execute(&self.pool).await?;

        info!(table = OUTBOX_TABLE, "Initialized SQLite outbox schema");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_common::{ChannelMessage, PLATFORM_PUBLISHED};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repository() -> SqliteOutboxRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteOutboxRepository::new(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    async fn insert(repo: &SqliteOutboxRepository, platform_id: i64) -> OutboxItem {
        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({"id": platform_id}));
        let item = OutboxItem::pending(&message, platform_id.to_string());
        enqueue(repo.pool(), &item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch_pending_in_order() {
        let repo = repository().await;
        let first = insert(&repo, 1).await;
        let second = insert(&repo, 2).await;

        let pending = repo.fetch_pending(10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(pending[0].payload, json!({"id": 1}));
        assert_eq!(pending[0].event_type, PLATFORM_PUBLISHED);
        assert_eq!(pending[0].aggregate_id, "1");
        assert_eq!(pending[0].status, OutboxStatus::PENDING);
    }

    #[tokio::test]
    async fn test_claim_skips_items_already_in_progress() {
        let repo = repository().await;
        let a = insert(&repo, 1).await;
        let b = insert(&repo, 2).await;

        let first = repo.mark_in_progress(vec![a.id.clone()]).await.unwrap();
        assert_eq!(first, vec![a.id.clone()]);

        let second = repo.mark_in_progress(vec![a.id.clone(), b.id.clone()]).await.unwrap();
        assert_eq!(second, vec![b.id.clone()]);
        assert!(repo.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_increment_retry_returns_item_to_pending() {
        let repo = repository().await;
        let item = insert(&repo, 1).await;
        repo.mark_in_progress(vec![item.id.clone()]).await.unwrap();

        repo.increment_retry_count(vec![item.id.clone()], Some("broker down".into()))
            .await
            .unwrap();

        let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::PENDING);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_message.as_deref(), Some("broker down"));
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_stuck_items_are_recovered() {
        let repo = repository().await;
        let stuck = insert(&repo, 1).await;
        let fresh = insert(&repo, 2).await;
        repo.mark_in_progress(vec![stuck.id.clone(), fresh.id.clone()]).await.unwrap();

        let long_ago = Utc::now().timestamp_millis() - 600_000;
        sqlx::query("UPDATE outbox_events SET updated_at = ? WHERE id = ?")
            .bind(long_ago)
            .bind(&stuck.id)
            .execute(repo.pool())
            .await
            .unwrap();

        let recovered = repo.recover_stuck_items(Duration::from_secs(300)).await.unwrap();
        assert_eq!(recovered, 1);

        let stuck_now = repo.find_by_id(&stuck.id).await.unwrap().unwrap();
        let fresh_now = repo.find_by_id(&fresh.id).await.unwrap().unwrap();
        assert_eq!(stuck_now.status, OutboxStatus::PENDING);
        assert_eq!(fresh_now.status, OutboxStatus::IN_PROGRESS);
    }

    #[tokio::test]
    async fn test_enqueue_rolls_back_with_transaction() {
        let repo = repository().await;
        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({}));
        let item = OutboxItem::pending(&message, "9");

        let mut tx = repo.pool().begin().await.unwrap();
        enqueue(&mut *tx, &item).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(repo.find_by_id(&item.id).await.unwrap().is_none());
    }
}

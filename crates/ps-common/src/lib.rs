//! Platform Service Common Types
//!
//! Shared building blocks used by the platform API and the outbox relay:
//! - Outbox records and their integer status codes
//! - The message envelope handed to the event channel
//! - The `Observer` seam that replaces ad-hoc logging in core components
//! - The retry policy and cancellation-aware sleeping
//! - Logging initialisation for the binaries

pub mod logging;
pub mod observe;
pub mod retry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use observe::{Observation, Observer, TracingObserver};
pub use retry::{backoff_delay, Cancelled, RetryPolicy, Sleeper, TokioSleeper};
pub use tokio_util::sync::CancellationToken;

/// Event type tag carried by every platform creation event.
pub const PLATFORM_PUBLISHED: &str = "Platform_Published";

// ============================================================================
// Channel Message
// ============================================================================

/// Envelope sent to the asynchronous event channel.
///
/// `message_id` is stable across retries and relay attempts, so consumers can
/// deduplicate under at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub message_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl ChannelMessage {
    /// Build a message with a freshly generated id.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload,
        }
    }
}

// ============================================================================
// Outbox Types
// ============================================================================

/// Outbox status codes. Stored as integers in the `outbox_events` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(non_camel_case_types)]
pub enum OutboxStatus {
    /// Waiting for the relay (code: 0)
    PENDING,
    /// Delivered to the channel (code: 1)
    SUCCESS,
    /// Relay gave up after the configured number of attempts (code: 3)
    FAILED,
    /// Claimed by a relay (code: 9)
    IN_PROGRESS,
}

impl OutboxStatus {
    /// Convert status to integer code for database storage
    pub fn code(&self) -> i32 {
        match self {
            OutboxStatus::PENDING => 0,
            OutboxStatus::SUCCESS => 1,
            OutboxStatus::FAILED => 3,
            OutboxStatus::IN_PROGRESS => 9,
        }
    }

    /// Parse an integer code. Unknown codes are treated as pending so a row
    /// is never silently dropped.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => OutboxStatus::SUCCESS,
            3 => OutboxStatus::FAILED,
            9 => OutboxStatus::IN_PROGRESS,
            _ => OutboxStatus::PENDING,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::SUCCESS | OutboxStatus::FAILED)
    }
}

impl Default for OutboxStatus {
    fn default() -> Self {
        OutboxStatus::PENDING
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::PENDING => write!(f, "PENDING"),
            OutboxStatus::SUCCESS => write!(f, "SUCCESS"),
            OutboxStatus::FAILED => write!(f, "FAILED"),
            OutboxStatus::IN_PROGRESS => write!(f, "IN_PROGRESS"),
        }
    }
}

/// A row of the `outbox_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxItem {
    /// Same value as the channel message id
    pub id: String,
    pub event_type: String,
    /// Identifier of the aggregate the event describes (the platform id)
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    /// Number of completed relay attempts that ended without delivery
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OutboxItem {
    /// Create a pending item for a channel message.
    pub fn pending(message: &ChannelMessage, aggregate_id: impl Into<String>) -> Self {
        Self {
            id: message.message_id.clone(),
            event_type: message.event_type.clone(),
            aggregate_id: aggregate_id.into(),
            payload: message.payload.clone(),
            status: OutboxStatus::PENDING,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Rebuild the channel message this row was created from.
    pub fn to_message(&self) -> ChannelMessage {
        ChannelMessage {
            message_id: self.id.clone(),
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            OutboxStatus::PENDING,
            OutboxStatus::SUCCESS,
            OutboxStatus::FAILED,
            OutboxStatus::IN_PROGRESS,
        ] {
            assert_eq!(OutboxStatus::from_code(status.code()), status);
        }
        assert_eq!(OutboxStatus::from_code(42), OutboxStatus::PENDING);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OutboxStatus::SUCCESS.is_terminal());
        assert!(OutboxStatus::FAILED.is_terminal());
        assert!(!OutboxStatus::PENDING.is_terminal());
        assert!(!OutboxStatus::IN_PROGRESS.is_terminal());
    }

    #[test]
    fn test_outbox_item_keeps_message_identity() {
        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({"id": 7}));
        let item = OutboxItem::pending(&message, "7");

        assert_eq!(item.id, message.message_id);
        assert_eq!(item.status, OutboxStatus::PENDING);
        assert_eq!(item.to_message(), message);
    }

    #[test]
    fn test_channel_message_serializes_camel_case() {
        let message = ChannelMessage::new(PLATFORM_PUBLISHED, json!({"name": "Docker"}));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["eventType"], "Platform_Published");
        assert_eq!(value["payload"]["name"], "Docker");
        assert!(value["messageId"].is_string());
    }
}

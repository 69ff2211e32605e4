//! Structured observations
//!
//! Core components report what happens to an injected [`Observer`] instead of
//! writing to the log directly. Production wiring uses [`TracingObserver`];
//! tests record observations and assert on them.

use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Something worth reporting during platform creation or outbox relaying.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    PlatformsListed { count: usize },
    PlatformNotFound { platform_id: i64 },
    CustomerResolved { customer_id: i64, created: bool },
    PlatformPersisted { platform_id: i64, customer_id: i64 },
    ReplicationSucceeded { platform_id: i64 },
    /// The synchronous peer call failed. Never fatal.
    ReplicationFailed { platform_id: i64, cause: String },
    PublishAttemptFailed {
        message_id: String,
        attempt: u32,
        max_attempts: u32,
        cause: String,
        /// Wait before the next attempt, `None` after the final attempt
        retry_in: Option<Duration>,
    },
    PublishSucceeded { message_id: String, attempt: u32 },
    PublishExhausted { message_id: String, attempts: u32, cause: String },
    PublishCancelled { message_id: String, attempt: u32 },
    OutboxEnqueued { message_id: String, platform_id: i64 },
    Committed { platform_id: i64 },
    RolledBack { reason: String },
    RollbackFailed { cause: String },
    RelayDelivered { item_id: String, attempts: u32 },
    RelayDeferred { item_id: String, retry_count: i32, cause: String },
    RelayGaveUp { item_id: String, retry_count: i32, cause: String },
    RelayError { cause: String },
    StuckItemsRecovered { count: u64 },
}

/// Receiver for [`Observation`]s.
pub trait Observer: Send + Sync {
    fn observe(&self, observation: Observation);
}

/// Observer that emits each observation as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, observation: Observation) {
        match observation {
            Observation::PlatformsListed { count } => {
                debug!(count, "Listed platforms");
            }
            Observation::PlatformNotFound { platform_id } => {
                debug!(platform_id, "Platform not found");
            }
            Observation::CustomerResolved { customer_id, created } => {
                info!(customer_id, created, "Resolved owning customer");
            }
            Observation::PlatformPersisted { platform_id, customer_id } => {
                debug!(platform_id, customer_id, "Platform staged");
            }
            Observation::ReplicationSucceeded { platform_id } => {
                debug!(platform_id, "Platform replicated synchronously");
            }
            Observation::ReplicationFailed { platform_id, cause } => {
                warn!(platform_id, cause = %cause, "Could not replicate platform synchronously");
            }
            Observation::PublishAttemptFailed { message_id, attempt, max_attempts, cause, retry_in } => {
                warn!(
                    message_id = %message_id,
                    attempt,
                    max_attempts,
                    retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                    cause = %cause,
                    "Publish attempt failed"
                );
            }
            Observation::PublishSucceeded { message_id, attempt } => {
                info!(message_id = %message_id, attempt, "Creation event published");
            }
            Observation::PublishExhausted { message_id, attempts, cause } => {
                error!(message_id = %message_id, attempts, cause = %cause, "Could not publish creation event");
            }
            Observation::PublishCancelled { message_id, attempt } => {
                warn!(message_id = %message_id, attempt, "Publish cancelled during backoff");
            }
            Observation::OutboxEnqueued { message_id, platform_id } => {
                debug!(message_id = %message_id, platform_id, "Creation event written to outbox");
            }
            Observation::Committed { platform_id } => {
                info!(platform_id, "Platform creation committed");
            }
            Observation::RolledBack { reason } => {
                warn!(reason = %reason, "Platform creation rolled back");
            }
            Observation::RollbackFailed { cause } => {
                error!(cause = %cause, "Rollback failed");
            }
            Observation::RelayDelivered { item_id, attempts } => {
                debug!(item_id = %item_id, attempts, "Outbox item delivered");
            }
            Observation::RelayDeferred { item_id, retry_count, cause } => {
                warn!(item_id = %item_id, retry_count, cause = %cause, "Outbox item deferred");
            }
            Observation::RelayGaveUp { item_id, retry_count, cause } => {
                error!(item_id = %item_id, retry_count, cause = %cause, "Outbox item marked failed");
            }
            Observation::RelayError { cause } => {
                error!(cause = %cause, "Error processing outbox batch");
            }
            Observation::StuckItemsRecovered { count } => {
                info!(count, "Recovered stuck outbox items");
            }
        }
    }
}

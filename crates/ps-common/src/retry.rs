//! Retry policy and cancellation-aware sleeping
//!
//! The backoff schedule is a pure function of the failed attempt number and the
//! base delay. Waiting is delegated to a [`Sleeper`] so callers can be cancelled
//! mid-backoff and tests can observe the schedule without real time passing.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    /// Wait to apply after `attempt` (1-based) has failed.
    ///
    /// Returns `None` once the attempt budget is spent: there is no wait after
    /// the final attempt.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        Some(backoff_delay(attempt, self.base_delay))
    }

    /// Every wait the policy can produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .filter_map(|attempt| self.delay_after(attempt))
            .collect()
    }

    /// Upper bound on time spent waiting between attempts.
    pub fn total_backoff(&self) -> Duration {
        self.schedule()
            .into_iter()
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

/// `base * 2^(attempt - 1)`, saturating instead of overflowing.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

/// Returned when a wait is interrupted by its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Suspends the caller for a backoff interval unless cancelled first.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled>;
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_default_schedule_doubles_from_one_second() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_after(4), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_after(5), None);
        assert_eq!(policy.delay_after(0), None);
    }

    #[test]
    fn test_schedule_has_one_wait_fewer_than_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
        assert_eq!(policy.total_backoff(), Duration::from_secs(15));
    }

    #[test]
    fn test_single_attempt_policy_never_waits() {
        let policy = RetryPolicy::new(1, Duration::from_millis(500));
        assert!(policy.schedule().is_empty());
        assert_eq!(policy.delay_after(1), None);
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let huge = backoff_delay(200, Duration::from_secs(u64::MAX / 2));
        assert_eq!(huge, Duration::MAX);
        assert_eq!(backoff_delay(1, Duration::from_millis(250)), Duration::from_millis(250));
        assert_eq!(backoff_delay(3, Duration::from_millis(250)), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_waits_full_duration() {
        let token = CancellationToken::new();
        let started = Instant::now();

        TokioSleeper.sleep(Duration::from_secs(4), &token).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_stops_on_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = TokioSleeper.sleep(Duration::from_secs(60), &token).await;

        assert_eq!(result, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let result = TokioSleeper.sleep(Duration::from_secs(3600), &token).await;
        assert_eq!(result, Err(Cancelled));
    }
}

//! Asynchronous event publisher
//!
//! Sends a message through a [`MessageChannel`] under a bounded exponential
//! backoff. Waits go through a [`Sleeper`] and stop early when the caller's
//! cancellation token fires.

use std::sync::Arc;

use ps_common::{ChannelMessage, Observation, Observer, RetryPolicy, Sleeper, TokioSleeper};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelError, MessageChannel};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: ChannelError,
    },

    #[error("publish cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl PublishError {
    pub fn attempts(&self) -> u32 {
        match self {
            PublishError::Exhausted { attempts, .. } | PublishError::Cancelled { attempts } => *attempts,
        }
    }
}

pub struct AsyncEventPublisher {
    channel: Arc<dyn MessageChannel>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    observer: Arc<dyn Observer>,
}

impl AsyncEventPublisher {
    pub fn new(channel: Arc<dyn MessageChannel>, policy: RetryPolicy, observer: Arc<dyn Observer>) -> Self {
        Self {
            channel,
            policy,
            sleeper: Arc::new(TokioSleeper),
            observer,
        }
    }

    /// Replace the timer-backed sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Publish `message`, retrying per the policy.
    ///
    /// Returns the number of attempts it took. Exhaustion carries the last
    /// channel error; a fired token ends the loop with `Cancelled`.
    pub async fn publish(&self, message: &ChannelMessage, cancel: &CancellationToken) -> Result<u32, PublishError> {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(message, attempt));
            }

            attempt += 1;
            let err = match self.channel.send(message).await {
                Ok(()) => {
                    self.observer.observe(Observation::PublishSucceeded {
                        message_id: message.message_id.clone(),
                        attempt,
                    });
                    return Ok(attempt);
                }
                Err(err) => err,
            };

            let retry_in = self.policy.delay_after(attempt);
            self.observer.observe(Observation::PublishAttemptFailed {
                message_id: message.message_id.clone(),
                attempt,
                max_attempts: self.policy.max_attempts,
                cause: err.to_string(),
                retry_in,
            });

            let Some(delay) = retry_in else {
                self.observer.observe(Observation::PublishExhausted {
                    message_id: message.message_id.clone(),
                    attempts: attempt,
                    cause: err.to_string(),
                });
                return Err(PublishError::Exhausted { attempts: attempt, last_error: err });
            };

            if self.sleeper.sleep(delay, cancel).await.is_err() {
                return Err(self.cancelled(message, attempt));
            }
        }
    }

    fn cancelled(&self, message: &ChannelMessage, attempts: u32) -> PublishError {
        self.observer.observe(Observation::PublishCancelled {
            message_id: message.message_id.clone(),
            attempt: attempts,
        });
        PublishError::Cancelled { attempts }
    }
}

//! Test doubles for the observer and sleeper seams.
//!
//! Enabled for this crate's own tests and, through the `test-utils` feature, for
//! the test suites of the other workspace crates.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::observe::{Observation, Observer};
use crate::retry::{Cancelled, Sleeper};

/// Observer that keeps every observation in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Observation) -> bool) -> usize {
        self.observations.lock().iter().filter(|o| predicate(o)).count()
    }

    pub fn contains(&self, predicate: impl Fn(&Observation) -> bool) -> bool {
        self.count(predicate) > 0
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, observation: Observation) {
        self.observations.lock().push(observation);
    }
}

/// Sleeper that returns immediately and records the requested durations.
///
/// Honors the cancellation token, and can be told to cancel it on the n-th
/// sleep to simulate a shutdown arriving mid-backoff.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    cancel_on_sleep: Option<usize>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the caller's token when the `n`-th (1-based) sleep is requested.
    pub fn cancelling_on(n: usize) -> Self {
        Self {
            delays: Mutex::new(Vec::new()),
            cancel_on_sleep: Some(n),
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let requested = {
            let mut delays = self.delays.lock();
            delays.push(duration);
            delays.len()
        };

        if self.cancel_on_sleep == Some(requested) {
            cancel.cancel();
        }
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }
}

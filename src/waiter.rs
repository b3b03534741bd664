//! The state-change waiter.
//!
//! [`StateChangeConf::wait_for_state`] polls a refresh function until the
//! observed state lands in the target set. Timing (initial delay, backoff,
//! minimum interval, total budget, cancellation) is shared with the retry
//! engine; what this module adds is classifying each observation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errs;
use crate::error::{NotFoundError, ProviderError, TimeoutError, UnexpectedStateError};
use crate::retry::Pacer;

/// Target states that mean "the object is gone". NotFound counts toward
/// these (compared case-insensitively).
pub const DELETED_STATES: &[&str] = &["deleted", "delete_complete", "terminated", "gone"];

/// Default number of consecutive NotFound observations tolerated before a
/// deletion counts as complete.
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

/// What a refresh function observed. `Ok(None)` and a NotFound error both
/// mean the object could not be found.
pub type RefreshResult<T> = Result<Option<(T, String)>, ProviderError>;

/// Configuration of one wait. Built per call, never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeConf {
    /// States that mean "keep waiting".
    pub pending: Vec<String>,
    /// States that end the wait successfully.
    pub target: Vec<String>,
    /// Total budget.
    pub timeout: Duration,
    /// Wait before the first poll.
    pub delay: Duration,
    /// Minimum wait between polls.
    pub min_timeout: Duration,
    /// Fixed wait between polls; zero selects exponential backoff.
    pub poll_interval: Duration,
    /// Consecutive NotFound observations that must be exceeded before a
    /// deletion counts as complete.
    pub not_found_checks: u32,
    /// Consecutive target observations required.
    pub continuous_target_occurence: u32,
}

impl StateChangeConf {
    /// A wait from `pending` to `target` within `timeout`.
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::ZERO,
            min_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurence: 1,
        }
    }

    /// Wait before the first poll.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Minimum wait between polls.
    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Fixed wait between polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Consecutive NotFound observations to exceed before success.
    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Require the target state to be observed `count` times in a row.
    pub fn with_continuous_target_occurence(mut self, count: u32) -> Self {
        self.continuous_target_occurence = count.max(1);
        self
    }

    fn is_pending(&self, state: &str) -> bool {
        self.pending.iter().any(|s| s == state)
    }

    fn is_target(&self, state: &str) -> bool {
        self.target.iter().any(|s| s == state)
    }

    /// Whether NotFound observations count toward the target.
    fn waits_for_absence(&self) -> bool {
        self.target.is_empty()
            || self.target.iter().any(|t| {
                DELETED_STATES
                    .iter()
                    .any(|d| t.eq_ignore_ascii_case(d))
            })
    }

    fn check(&self) -> Result<(), ProviderError> {
        if let Some(overlap) = self.pending.iter().find(|s| self.is_target(s)) {
            return Err(ProviderError::Configuration(format!(
                "state '{}' is both pending and target",
                overlap
            )));
        }
        Ok(())
    }

    fn timeout_error(&self, last_state: Option<String>) -> ProviderError {
        TimeoutError {
            last_error: None,
            last_state,
            timeout: self.timeout,
            expected_state: self.target.clone(),
        }
        .into()
    }

    /// Poll `refresh` until the observed state reaches the target.
    ///
    /// Returns the last refreshed object, or `None` when the wait ended
    /// because the object is gone.
    pub async fn wait_for_state<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut refresh: F,
    ) -> Result<Option<T>, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RefreshResult<T>>,
    {
        self.check()?;

        let mut pacer = Pacer::new(self.timeout, self.min_timeout, self.poll_interval);
        pacer.initial_delay(self.delay, Duration::ZERO, cancel).await?;

        let mut not_found_tick = 0u32;
        let mut target_occurence = 0u32;
        let mut last_state: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled(format!(
                    "context cancelled while waiting for state to become '{}'",
                    self.target.join(", ")
                )));
            }

            match refresh().await {
                Ok(Some((object, state))) => {
                    not_found_tick = 0;
                    trace!(state = %state, "refreshed state");

                    if self.is_target(&state) {
                        target_occurence += 1;
                        if target_occurence >= self.continuous_target_occurence {
                            debug!(state = %state, "reached target state");
                            return Ok(Some(object));
                        }
                    } else if self.is_pending(&state) {
                        target_occurence = 0;
                    } else {
                        return Err(UnexpectedStateError {
                            state,
                            expected_state: self.target.clone(),
                            last_error: None,
                        }
                        .into());
                    }
                    last_state = Some(state);
                }
                Ok(None) => {
                    if let Some(done) = self.observe_not_found(&mut not_found_tick, None)? {
                        return Ok(done);
                    }
                }
                Err(e) if errs::is_not_found(&e) => {
                    if let Some(done) = self.observe_not_found(&mut not_found_tick, Some(e))? {
                        return Ok(done);
                    }
                }
                Err(e) => return Err(e),
            }

            if !pacer.expired() {
                pacer.pause(cancel).await?;
            }
            if pacer.expired() {
                debug!(last_state = ?last_state, "waiter timed out");
                return Err(self.timeout_error(last_state));
            }
        }
    }

    /// Count one NotFound observation. `Ok(Some(None))` means the object
    /// is gone and the wait is over.
    fn observe_not_found<T>(
        &self,
        tick: &mut u32,
        err: Option<ProviderError>,
    ) -> Result<Option<Option<T>>, ProviderError> {
        if !self.waits_for_absence() {
            return Err(err.unwrap_or_else(|| {
                NotFoundError::with_message(format!(
                    "couldn't find resource while waiting for state to become '{}'",
                    self.target.join(", ")
                ))
                .into()
            }));
        }

        *tick += 1;
        trace!(consecutive = *tick, checks = self.not_found_checks, "resource not found");
        if *tick > self.not_found_checks {
            debug!(consecutive = *tick, "resource is gone");
            return Ok(Some(None));
        }
        Ok(None)
    }
}

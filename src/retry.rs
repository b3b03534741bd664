//! The retry engine.
//!
//! [`retry`] calls a body until it succeeds, fails terminally, or the total
//! timeout runs out. Calls are strictly sequential; the only suspension
//! points are the sleeps between attempts, and those are interrupted by the
//! cancellation token.
//!
//! # Final attempt after timeout
//!
//! When a retry times out while the remote side is merely slow (for example
//! throttling during a delete), callers usually want one last direct call
//! and to use its result. [`retry_with_final_attempt`] does exactly that; the
//! `retry_when*` helpers are built on it.
//!
//! ```ignore
//! let cfg = RetryConfig::new(Duration::from_secs(120));
//! retry_with_final_attempt(&cfg, &cancel, || async {
//!     match client.delete_widget(&id).await {
//!         Ok(()) => RetryOutcome::Success(()),
//!         Err(e) if errs::is_throttling(&e) => RetryOutcome::Retryable(e),
//!         Err(e) => RetryOutcome::Terminal(e),
//!     }
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errs;
use crate::error::{ProviderError, TimeoutError};

/// The state a retry reports while it is still trying.
const RETRYABLE_STATE: &str = "retryableerror";
/// The state a retry reports once the body succeeded.
const SUCCESS_STATE: &str = "success";

/// Default minimum interval between attempts.
pub const DEFAULT_MIN_TIMEOUT: Duration = Duration::from_millis(500);

/// What one invocation of a retry body produced.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// Done, with a value.
    Success(T),
    /// Failed, but another attempt may succeed.
    Retryable(ProviderError),
    /// Failed for good; stop immediately.
    Terminal(ProviderError),
}

impl<T> RetryOutcome<T> {
    /// Classify a result: errors matching `retryable` may be retried.
    pub fn from_result<F>(result: Result<T, ProviderError>, retryable: F) -> Self
    where
        F: FnOnce(&ProviderError) -> bool,
    {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) if retryable(&e) => Self::Retryable(e),
            Err(e) => Self::Terminal(e),
        }
    }

    fn into_result(self) -> Result<T, ProviderError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Retryable(e) | Self::Terminal(e) => Err(e),
        }
    }
}

/// Timing of a retry loop. Built per call, never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Wait before the first attempt.
    pub delay: Duration,
    /// The first wait varies by up to this much either way.
    pub delay_jitter: Duration,
    /// Minimum wait between attempts.
    pub min_timeout: Duration,
    /// Fixed wait between attempts; zero selects exponential backoff.
    pub poll_interval: Duration,
    /// Total budget. Dominates every other duration.
    pub timeout: Duration,
}

impl RetryConfig {
    /// A config with the given total timeout and default pacing.
    pub fn new(timeout: Duration) -> Self {
        Self {
            delay: Duration::ZERO,
            delay_jitter: Duration::ZERO,
            min_timeout: DEFAULT_MIN_TIMEOUT,
            poll_interval: Duration::ZERO,
            timeout,
        }
    }

    /// Wait before the first attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Vary the first wait by up to `jitter` either way.
    pub fn with_delay_jitter(mut self, jitter: Duration) -> Self {
        self.delay_jitter = jitter;
        self
    }

    /// Minimum wait between attempts.
    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Fixed wait between attempts.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Clock and sleep schedule shared by the retry engine and the waiter.
pub(crate) struct Pacer {
    start: Instant,
    timeout: Duration,
    min_timeout: Duration,
    poll_interval: Duration,
    backoff: Box<dyn Iterator<Item = Duration> + Send + Sync>,
}

impl Pacer {
    /// Max wait between attempts when backing off exponentially.
    const MAX_BACKOFF: Duration = Duration::from_secs(10);

    pub(crate) fn new(timeout: Duration, min_timeout: Duration, poll_interval: Duration) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Self::MAX_BACKOFF)
            .with_factor(2.0)
            .with_max_times(usize::MAX)
            .build();
        Self {
            start: Instant::now(),
            timeout,
            min_timeout,
            poll_interval,
            backoff: Box::new(backoff),
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn expired(&self) -> bool {
        self.start.elapsed() >= self.timeout
    }

    fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    /// Sleep before the first attempt, bounded by the remaining budget.
    pub(crate) async fn initial_delay(
        &self,
        delay: Duration,
        jitter: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let delay = jittered(delay, jitter);
        if delay.is_zero() {
            return Ok(());
        }
        sleep_or_cancel(delay.min(self.remaining()), cancel).await
    }

    /// Sleep until the next attempt, bounded by the remaining budget.
    pub(crate) async fn pause(&mut self, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let wait = if self.poll_interval.is_zero() {
            self.backoff.next().unwrap_or(Self::MAX_BACKOFF)
        } else {
            self.poll_interval
        };
        let wait = wait.max(self.min_timeout).min(self.remaining());
        sleep_or_cancel(wait, cancel).await
    }
}

fn jittered(delay: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(Duration::ZERO..=jitter.saturating_mul(2));
    delay.saturating_add(offset).saturating_sub(jitter)
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(ProviderError::Cancelled(
            "context cancelled while waiting".to_string(),
        )),
    }
}

/// Call `body` until it succeeds, fails terminally, or `config.timeout` elapses.
///
/// On timeout the returned [`TimeoutError`] carries the last retryable error.
/// A zero timeout performs exactly one attempt.
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut body: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryOutcome<T>>,
{
    let mut pacer = Pacer::new(config.timeout, config.min_timeout, config.poll_interval);
    pacer
        .initial_delay(config.delay, config.delay_jitter, cancel)
        .await?;

    let mut attempt = 0u32;
    let mut last_error: Option<ProviderError>;

    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled(format!(
                "context cancelled after {} attempt(s)",
                attempt
            )));
        }

        attempt += 1;
        match body().await {
            RetryOutcome::Success(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            RetryOutcome::Terminal(e) => {
                debug!(attempt, error = %e, "non-retryable error");
                return Err(e);
            }
            RetryOutcome::Retryable(e) => {
                debug!(attempt, error = %e, "retryable error");
                last_error = Some(e);
            }
        }

        if pacer.expired() {
            break;
        }
        pacer.pause(cancel).await?;
        if pacer.expired() {
            break;
        }
    }

    debug!(attempt, timeout = ?pacer.timeout(), "retry timed out");
    Err(TimeoutError {
        last_error: last_error.map(Box::new),
        last_state: Some(RETRYABLE_STATE.to_string()),
        timeout: pacer.timeout(),
        expected_state: vec![SUCCESS_STATE.to_string()],
    }
    .into())
}

/// [`retry`], then on timeout call `body` once more and return that result.
pub async fn retry_with_final_attempt<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut body: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryOutcome<T>>,
{
    match retry(config, cancel, &mut body).await {
        Err(e) if errs::timed_out(&e) => {
            info!(error = %e, "retry timed out, making final attempt");
            body().await.into_result()
        }
        other => other,
    }
}

/// Retry `f` while its error satisfies `retryable`, with a final attempt
/// after timeout.
pub async fn retry_when<T, F, Fut, P>(
    timeout: Duration,
    cancel: &CancellationToken,
    mut f: F,
    retryable: P,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    P: Fn(&ProviderError) -> bool,
{
    let config = RetryConfig::new(timeout);
    let retryable = &retryable;
    retry_with_final_attempt(&config, cancel, || {
        let fut = f();
        async move { RetryOutcome::from_result(fut.await, |e| retryable(e)) }
    })
    .await
}

/// Retry `f` while it fails with one of `codes`.
pub async fn retry_when_code_in<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    codes: &[&str],
    f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_when(timeout, cancel, f, |e| errs::code_in(e, codes)).await
}

/// Retry `f` while it reports NotFound, e.g. reading right after a create.
///
/// A NotFound that outlives the timeout records how many lookups were made.
pub async fn retry_when_not_found<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = 0u32;
    let result = retry_when(
        timeout,
        cancel,
        || {
            attempts += 1;
            f()
        },
        |e| errs::is_not_found(e),
    )
    .await;
    result.map_err(|e| match e {
        ProviderError::NotFound(mut not_found) => {
            not_found.retries = attempts;
            ProviderError::NotFound(not_found)
        }
        other => other,
    })
}

/// Retry NotFound only while the resource is new; established resources
/// fail fast so Read can drop them from state.
pub async fn retry_when_new_resource_not_found<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    is_new_resource: bool,
    f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_when(timeout, cancel, f, |e| {
        is_new_resource && errs::is_not_found(e)
    })
    .await
}

/// Call `f` until it reports NotFound. Any other error is terminal.
pub async fn retry_until_not_found<T, F, Fut>(
    timeout: Duration,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<(), ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let config = RetryConfig::new(timeout);
    retry(&config, cancel, || {
        let fut = f();
        async move {
            match fut.await {
                Ok(_) => RetryOutcome::Retryable(ProviderError::Sdk(
                    "resource still exists".to_string(),
                )),
                Err(e) if errs::is_not_found(&e) => RetryOutcome::Success(()),
                Err(e) => RetryOutcome::Terminal(e),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NotFoundError, RemoteError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn throttled() -> ProviderError {
        RemoteError::new("Throttling", "Rate exceeded").into()
    }

    fn fast(timeout: Duration) -> RetryConfig {
        RetryConfig::new(timeout)
            .with_min_timeout(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(250))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_retryable_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let value = retry(&fast(Duration::from_secs(10)), &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                RetryOutcome::Retryable(throttled())
            } else {
                RetryOutcome::Success(42)
            }
        })
        .await;
        assert_eq!(assert_ok!(value), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_terminal_error() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> = retry(&fast(Duration::from_secs(10)), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            RetryOutcome::Terminal(RemoteError::new("AccessDenied", "no").into())
        })
        .await;
        let err = assert_err!(result);
        assert!(errs::code_equals(&err, "AccessDenied"));
        assert!(!errs::timed_out(&err));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_runs_body_once() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> = retry(&RetryConfig::new(Duration::ZERO), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            RetryOutcome::Retryable(throttled())
        })
        .await;
        assert!(errs::timed_out(&assert_err!(result)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_error_and_final_attempt_succeeds() {
        // Attempts at 0, 250, 500 and 750ms are throttled; the budget runs
        // out at 1s before a fifth attempt would have succeeded.
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let config = fast(Duration::from_secs(1));
        let body = || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                    RetryOutcome::Retryable(throttled())
                } else {
                    RetryOutcome::Success("deleted")
                }
            }
        };

        let start = Instant::now();
        let err = assert_err!(retry(&config, &cancel, body).await);
        assert!(errs::timed_out(&err));
        assert!(errs::code_equals(&err, "Throttling"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() <= config.timeout + config.poll_interval);

        calls.store(0, Ordering::SeqCst);
        let value = retry_with_final_attempt(&config, &cancel, body).await;
        assert_eq!(assert_ok!(value), "deleted");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_is_applied() {
        let cancel = CancellationToken::new();
        let config = fast(Duration::from_secs(10)).with_delay(Duration::from_secs(2));
        let start = Instant::now();
        let value = retry(&config, &cancel, || async { RetryOutcome::Success(()) }).await;
        assert_ok!(value);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..100 {
            let d = jittered(Duration::from_secs(1), Duration::from_millis(200));
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
        assert_eq!(jittered(Duration::from_secs(1), Duration::ZERO), Duration::from_secs(1));
        assert!(jittered(Duration::ZERO, Duration::from_millis(50)) <= Duration::from_millis(50));

        let huge = jittered(Duration::MAX, Duration::from_secs(1));
        assert!(huge >= Duration::MAX - Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = retry(
            &RetryConfig::new(Duration::from_secs(60))
                .with_poll_interval(Duration::from_secs(30)),
            &cancel,
            || async { RetryOutcome::Retryable(throttled()) },
        )
        .await;
        assert!(matches!(result, Err(ProviderError::Cancelled(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_when_not_found() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let value = retry_when_not_found(Duration::from_secs(60), &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(NotFoundError::new().into())
            } else {
                Ok("visible")
            }
        })
        .await;
        assert_eq!(assert_ok!(value), "visible");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_when_not_found_counts_lookups() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), ProviderError> =
            retry_when_not_found(Duration::from_secs(10), &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NotFoundError::new().into())
            })
            .await;
        match assert_err!(result) {
            ProviderError::NotFound(not_found) => {
                assert!(not_found.retries > 1);
                assert_eq!(not_found.retries, calls.load(Ordering::SeqCst));
                assert!(not_found.to_string().contains("retries"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_when_new_resource_not_found_fails_fast_for_existing() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> =
            retry_when_new_resource_not_found(Duration::from_secs(60), &cancel, false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NotFoundError::new().into())
            })
            .await;
        assert!(errs::is_not_found(&assert_err!(result)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_when_code_in() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let value = retry_when_code_in(
            Duration::from_secs(60),
            &cancel,
            &["InvalidParameterValueException"],
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RemoteError::new(
                        "InvalidParameterValueException",
                        "The role defined for the function cannot be assumed",
                    )
                    .into())
                } else {
                    Ok(7)
                }
            },
        )
        .await;
        assert_eq!(assert_ok!(value), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_not_found() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry_until_not_found(Duration::from_secs(60), &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(())
            } else {
                Err(ProviderError::from(NotFoundError::new()))
            }
        })
        .await;
        assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

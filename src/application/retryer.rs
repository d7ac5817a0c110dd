//! Token retryer: serialized, retryable execution of one remote mutation.
//!
//! The remote service accepts a single in-flight mutation per scope and
//! requires a change token that must be fetched again after every conflict.
//! [`TokenRetryer::retry_with_token`] owns that discipline:
//!
//! 1. fetch the current token for the scope,
//! 2. run the caller's mutation with it,
//! 3. on a stale token or concurrent modification, back off and start over
//!    with a fresh token,
//! 4. on throttling, back off and retry the same token (a throttled request
//!    does not consume it),
//! 5. return anything else immediately.
//!
//! Every retryable failure is followed by an exponential backoff sleep,
//! optionally shortened by a random jitter, and the whole loop is bounded by
//! [`RetryConfig::timeout`]. Tokens are never cached across calls.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::metrics::Metrics;
use crate::application::ports::{ApiError, ApiErrorKind, ChangeTokenSource, Clock};
use crate::domain::rule::{ChangeToken, Scope};

/// Retry loop settings.
///
/// Serialized with durations in milliseconds so it can be embedded in a host
/// configuration file:
///
/// ```
/// use rule_group_reconciler::RetryConfig;
/// use std::time::Duration;
///
/// let config: RetryConfig = serde_json::from_str(r#"{"timeout_ms": 60000}"#).unwrap();
/// assert_eq!(config.timeout, Duration::from_secs(60));
/// assert_eq!(config.max_backoff, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total wall-clock budget for one mutation, including token waits
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Sleep after the first retryable failure
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Upper bound for a single sleep
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive sleeps
    pub multiplier: f64,
    /// Fraction in `[0.0, 1.0]` by which each sleep may be randomly shortened
    ///
    /// Spreads out writers that keep colliding on the same scope.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            // Tokens under contention can take tens of seconds to free up.
            timeout: Duration::from_secs(15 * 60),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

/// Reasons a [`RetryConfig`] is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("initial backoff must be greater than zero")]
    ZeroBackoff,
    #[error("max backoff must not be smaller than initial backoff")]
    MaxBelowInitial,
    #[error("backoff multiplier must be a finite number >= 1.0")]
    InvalidMultiplier,
    #[error("jitter must be between 0.0 and 1.0")]
    InvalidJitter,
}

impl RetryConfig {
    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.initial_backoff.is_zero() {
            return Err(ConfigError::ZeroBackoff);
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::MaxBelowInitial);
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidJitter);
        }
        Ok(())
    }

    /// Sleep before the retry following `failures` earlier consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Randomly shorten `delay` by up to `jitter` of its length.
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let cut = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.mul_f64(1.0 - cut)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Caller-side cancellation for a retry loop.
///
/// Clones share state: calling [`cancel`](Self::cancel) on any clone aborts
/// every loop observing it at its next checkpoint. An optional deadline
/// cancels the same way once the retryer's clock reaches it.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A handle that is never triggered until [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that triggers at `deadline` or on [`cancel`](Self::cancel).
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the handle is cancelled or its deadline has passed at `now`.
    pub fn is_triggered(&self, now: Instant) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| now >= d)
    }
}

/// Terminal outcome of a retry loop that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// The timeout elapsed while the remote kept reporting retryable failures
    #[error("retries exhausted after {attempts} attempts in {elapsed:?}: {last}")]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: ApiError,
    },

    /// The caller cancelled the loop or its deadline passed
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        attempts: u32,
        last: Option<ApiError>,
    },

    /// A failure the retryer does not absorb
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl RetryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The most recent failure reported by the remote, if any.
    pub fn last_error(&self) -> Option<&ApiError> {
        match self {
            RetryError::Timeout { last, .. } => Some(last),
            RetryError::Cancelled { last, .. } => last.as_ref(),
            RetryError::Api(err) => Some(err),
        }
    }

    /// Kind of the most recent remote failure, if any.
    pub fn kind(&self) -> Option<ApiErrorKind> {
        self.last_error().map(ApiError::kind)
    }
}

/// Executes mutations against one scope with a freshly fetched token.
///
/// Generic over the token source so it can share the reconciler's client
/// (`S = dyn RuleGroupApi`) or use a dedicated one.
#[derive(Debug)]
pub struct TokenRetryer<S: ?Sized> {
    source: Arc<S>,
    scope: Scope,
    config: RetryConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl<S: ?Sized> Clone for TokenRetryer<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            scope: self.scope.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            metrics: self.metrics.clone(),
        }
    }
}

/// Bookkeeping for one `retry_with_token` call.
struct RetryState {
    start: Instant,
    /// `None` when the timeout reaches past what `Instant` can represent
    deadline: Option<Instant>,
    attempts: u32,
    failures: u32,
    last: Option<ApiError>,
}

impl<S> TokenRetryer<S>
where
    S: ChangeTokenSource + ?Sized,
{
    pub fn new(
        source: Arc<S>,
        scope: Scope,
        config: RetryConfig,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            scope,
            config,
            clock,
            metrics,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `mutation` with a valid change token, retrying per the module rules.
    ///
    /// `mutation` may be invoked several times; each invocation performs one
    /// remote call with the token it is given.
    pub fn retry_with_token<T, F>(
        &self,
        cancel: &Cancellation,
        mut mutation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(&ChangeToken) -> Result<T, ApiError>,
    {
        let start = self.clock.now();
        let mut state = RetryState {
            start,
            deadline: start.checked_add(self.config.timeout),
            attempts: 0,
            failures: 0,
            last: None,
        };

        loop {
            self.check_cancelled(cancel, &state)?;

            let token = match self.source.get_change_token(&self.scope) {
                Ok(token) => token,
                Err(err) if err.kind() == ApiErrorKind::Throttled => {
                    self.metrics.record_throttle();
                    self.back_off(cancel, &mut state, err)?;
                    continue;
                }
                Err(err) => return Err(RetryError::Api(err)),
            };

            loop {
                self.check_cancelled(cancel, &state)?;
                state.attempts += 1;

                let err = match mutation(&token) {
                    Ok(value) => {
                        self.metrics.record_mutation();
                        if state.attempts > 1 {
                            debug!(
                                scope = %self.scope,
                                attempts = state.attempts,
                                "mutation succeeded after retries"
                            );
                        }
                        return Ok(value);
                    }
                    Err(err) => err,
                };

                match err.kind() {
                    ApiErrorKind::Throttled => {
                        self.metrics.record_throttle();
                        self.back_off(cancel, &mut state, err)?;
                    }
                    ApiErrorKind::StaleToken | ApiErrorKind::ConcurrentModification => {
                        self.metrics.record_conflict();
                        self.back_off(cancel, &mut state, err)?;
                        break;
                    }
                    _ => return Err(RetryError::Api(err)),
                }
            }
        }
    }

    fn check_cancelled(&self, cancel: &Cancellation, state: &RetryState) -> Result<(), RetryError> {
        if cancel.is_triggered(self.clock.now()) {
            warn!(
                scope = %self.scope,
                attempts = state.attempts,
                "mutation retry cancelled"
            );
            return Err(RetryError::Cancelled {
                attempts: state.attempts,
                last: state.last.clone(),
            });
        }
        Ok(())
    }

    /// Record a retryable failure and sleep, or give up if out of time.
    fn back_off(
        &self,
        cancel: &Cancellation,
        state: &mut RetryState,
        err: ApiError,
    ) -> Result<(), RetryError> {
        let now = self.clock.now();
        if state.deadline.is_some_and(|deadline| now >= deadline) {
            self.metrics.record_timeout();
            warn!(
                scope = %self.scope,
                attempts = state.attempts,
                error = %err,
                "mutation retries exhausted"
            );
            return Err(RetryError::Timeout {
                attempts: state.attempts,
                elapsed: now.saturating_duration_since(state.start),
                last: err,
            });
        }

        let mut delay = self.config.jittered(self.config.backoff(state.failures));
        if let Some(deadline) = state.deadline {
            delay = delay.min(deadline.saturating_duration_since(now));
        }
        state.failures = state.failures.saturating_add(1);

        debug!(
            scope = %self.scope,
            attempt = state.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying mutation"
        );
        state.last = Some(err);

        self.clock.sleep(delay);
        self.check_cancelled(cancel, state)
    }
}

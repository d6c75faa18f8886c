//! Retry policy engine.
//!
//! Semantics:
//! - `attempt_count` is the 1-based number of attempts already made when a decision is taken.
//! - `ClientRejected`, `Conflict` and `AuthExpired` are never retried here. `AuthExpired` belongs
//!   to the token refresh coordinator.
//! - `RateLimited` retries while `attempt_count < rate_limit_max_attempts`, waiting for the
//!   server's `Retry-After` hint when one was sent.
//! - `Timeout`, `ServerError` and `NetworkUnreachable` retry while
//!   `attempt_count < max_attempts`.
//! - Non-idempotent operations only retry failures where the request provably did not execute:
//!   `NetworkUnreachable` and `RateLimited`.
//! - Backoff without a hint is `min(base * 2^(attempt_count - 1), cap)`.
//!
//! Invariants:
//! - Attempts never exceed `max_attempts`.
//! - Attempts for one operation are sequential; attempt N+1 starts after attempt N's delay.
//! - Only [`ApiError::Request`] values are eligible; every other error variant is propagated
//!   untouched.
//!
//! ```rust
//! use std::time::Duration;
//! use lifeline::{FailureKind, RetryPolicy};
//!
//! let policy = RetryPolicy::builder().max_attempts(3).rate_limit_max_attempts(2).build().unwrap();
//! let decision = policy.decide(FailureKind::ServerError, 1, true, None);
//! assert!(decision.should_retry);
//! assert_eq!(decision.delay, Duration::from_millis(1000));
//! assert!(!policy.decide(FailureKind::ServerError, 3, true, None).should_retry);
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::classify::FailureKind;
use crate::config::{CallClass, RetryConfig};
use crate::error::ApiError;
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{AccessEvent, RetryEvent, TelemetryHandle};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Default ceiling for query retries.
pub const DEFAULT_QUERY_CAP: Duration = Duration::from_secs(10);
/// Default ceiling for mutation retries.
pub const DEFAULT_MUTATION_CAP: Duration = Duration::from_secs(30);

/// Outcome of a retry decision. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn stop() -> Self {
        Self { should_retry: false, delay: Duration::ZERO }
    }

    pub fn retry_after(delay: Duration) -> Self {
        Self { should_retry: true, delay }
    }
}

/// Retry budgets plus the backoff schedule for one call class.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    rate_limit_max_attempts: u32,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    telemetry: TelemetryHandle,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("rate_limit_max_attempts", &self.rate_limit_max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Policy built from configuration for the given call class.
    pub fn from_config(config: &RetryConfig, class: CallClass) -> Result<Self, BuildError> {
        let cap = match class {
            CallClass::Query => config.query_cap(),
            CallClass::Mutation => config.mutation_cap(),
        };
        RetryPolicyBuilder::new()
            .max_attempts(config.max_attempts)
            .rate_limit_max_attempts(config.rate_limit_max_attempts)
            .base_delay(config.base_delay())
            .cap(cap)
            .build()
    }

    /// Route retry events to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn rate_limit_max_attempts(&self) -> u32 {
        self.rate_limit_max_attempts
    }

    /// Backoff delay after `attempt_count` attempts, before jitter.
    pub fn backoff_delay(&self, attempt_count: u32) -> Duration {
        self.backoff.delay(attempt_count)
    }

    /// Attempt budget for a failure kind, `None` when the kind is never retried.
    fn budget_for(&self, kind: FailureKind, idempotent: bool) -> Option<u32> {
        match kind {
            FailureKind::ClientRejected | FailureKind::Conflict | FailureKind::AuthExpired => None,
            FailureKind::RateLimited => Some(self.rate_limit_max_attempts),
            FailureKind::NetworkUnreachable => Some(self.max_attempts),
            FailureKind::Timeout | FailureKind::ServerError if idempotent => Some(self.max_attempts),
            FailureKind::Timeout | FailureKind::ServerError => None,
        }
    }

    /// Decide whether to retry after `attempt_count` attempts failed with `kind`.
    pub fn decide(
        &self,
        kind: FailureKind,
        attempt_count: u32,
        idempotent: bool,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        let Some(budget) = self.budget_for(kind, idempotent) else {
            return RetryDecision::stop();
        };
        if attempt_count >= budget {
            return RetryDecision::stop();
        }
        let delay = match (kind, retry_after) {
            (FailureKind::RateLimited, Some(hint)) => hint,
            _ => self.jitter.apply(self.backoff.delay(attempt_count)),
        };
        RetryDecision::retry_after(delay)
    }

    /// Run `operation` until it succeeds, fails terminally, or the budget runs out.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, Fut, Op>(&self, idempotent: bool, mut operation: Op) -> Result<T, ApiError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
        Op: FnMut(u32) -> Fut,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let (kind, retry_after) = match &err {
                ApiError::Request { kind, failure } => (*kind, failure.retry_after()),
                _ => return Err(err),
            };

            let decision = self.decide(kind, attempt, idempotent, retry_after);
            if !decision.should_retry {
                if self.budget_for(kind, idempotent).is_none() {
                    tracing::debug!(%kind, attempt, "not retrying");
                    return Err(err);
                }
                tracing::warn!(%kind, attempts = attempt, "retry budget exhausted");
                self.telemetry
                    .emit(AccessEvent::Retry(RetryEvent::Exhausted { attempts: attempt, kind }));
                return Err(ApiError::RetryExhausted { attempts: attempt, last: Box::new(err) });
            }

            tracing::debug!(%kind, attempt, delay_ms = decision.delay.as_millis() as u64, "retrying");
            self.telemetry.emit(AccessEvent::Retry(RetryEvent::Attempt {
                attempt,
                delay: decision.delay,
                kind,
            }));
            self.sleeper.sleep(decision.delay).await;
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    rate_limit_max_attempts: u32,
    base_delay: Duration,
    cap: Duration,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    telemetry: TelemetryHandle,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(u32),
    #[error("rate_limit_max_attempts must be > 0 and < max_attempts ({max_attempts}), got {provided}")]
    InvalidRateLimitAttempts { provided: u32, max_attempts: u32 },
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

impl RetryPolicyBuilder {
    /// Defaults: 3 attempts, 2 for rate limiting, 1s base, query cap (10s), no jitter.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_max_attempts: 2,
            base_delay: DEFAULT_BASE_DELAY,
            cap: DEFAULT_QUERY_CAP,
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
            telemetry: TelemetryHandle::disabled(),
        }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Total attempts for rate-limited failures. Must be below `max_attempts`.
    pub fn rate_limit_max_attempts(mut self, attempts: u32) -> Self {
        self.rate_limit_max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Ceiling for computed backoff delays.
    pub fn cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        // A single-attempt policy has no retries to budget; rate limiting stays at one attempt.
        let rate_limit_ok = self.rate_limit_max_attempts > 0
            && (self.rate_limit_max_attempts < self.max_attempts
                || (self.max_attempts == 1 && self.rate_limit_max_attempts == 1));
        if !rate_limit_ok {
            return Err(BuildError::InvalidRateLimitAttempts {
                provided: self.rate_limit_max_attempts,
                max_attempts: self.max_attempts,
            });
        }
        let backoff = if self.base_delay.is_zero() {
            Backoff::exponential(Duration::ZERO)
        } else {
            Backoff::exponential(self.base_delay).with_max(self.cap)?
        };
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            rate_limit_max_attempts: self.rate_limit_max_attempts,
            backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
            telemetry: self.telemetry,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

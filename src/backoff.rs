//! Backoff schedules for retries and reconnects.
//!
//! Attempt semantics: `attempt` is the 1-based number of attempts already made, so the delay
//! before the first retry is `delay(1)`. `delay(0)` is the initial call and is always zero.
//!
//! ```rust
//! use std::time::Duration;
//! use lifeline::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_secs(1))
//!     .with_max(Duration::from_secs(10))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay(2), Duration::from_secs(2));
//! assert_eq!(backoff.delay(3), Duration::from_secs(4));
//! assert_eq!(backoff.delay(5), Duration::from_secs(10)); // capped
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`].

use std::time::Duration;

/// Ceiling applied when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// `base * 2^(attempt - 1)`, optionally capped with [`Backoff::with_max`].
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, max: None } }
    }

    /// Cap an exponential schedule. Errors for constant schedules, a zero max, or `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay to wait after `attempt` attempts have been made.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            BackoffKind::Constant { delay } => (*delay).min(MAX_BACKOFF),
            BackoffKind::Exponential { base, max } => {
                let multiplier = 2u128.saturating_pow(attempt - 1);
                let nanos = base.as_nanos().saturating_mul(multiplier);
                let raw = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map(|m| raw.min(m)).unwrap_or(raw).min(MAX_BACKOFF)
            }
        }
    }

    /// Configured cap, if any.
    pub fn max(&self) -> Option<Duration> {
        match &self.kind {
            BackoffKind::Exponential { max, .. } => *max,
            BackoffKind::Constant { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_call_has_no_delay() {
        assert_eq!(Backoff::constant(Duration::from_millis(50)).delay(0), Duration::ZERO);
        assert_eq!(Backoff::exponential(Duration::from_millis(50)).delay(0), Duration::ZERO);
    }

    #[test]
    fn exponential_doubles_from_base() {
        let backoff = Backoff::exponential(Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay(3), Duration::from_millis(4000));
        assert_eq!(backoff.delay(4), Duration::from_millis(8000));
    }

    #[test]
    fn exponential_respects_cap() {
        let backoff = Backoff::exponential(Duration::from_secs(1))
            .with_max(Duration::from_secs(10))
            .unwrap();
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(10));
        assert_eq!(backoff.delay(40), Duration::from_secs(10));
        assert_eq!(backoff.max(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn huge_attempts_saturate() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn invalid_caps_are_rejected() {
        assert!(matches!(
            Backoff::constant(Duration::from_secs(1)).with_max(Duration::from_secs(2)),
            Err(BackoffError::ConstantDoesNotSupportMax)
        ));
        assert!(matches!(
            Backoff::exponential(Duration::from_secs(1)).with_max(Duration::ZERO),
            Err(BackoffError::MaxMustBePositive)
        ));
        assert!(matches!(
            Backoff::exponential(Duration::from_secs(5)).with_max(Duration::from_secs(1)),
            Err(BackoffError::MaxLessThanBase { .. })
        ));
    }

    #[test]
    fn zero_base_stays_zero() {
        assert_eq!(Backoff::exponential(Duration::ZERO).delay(7), Duration::ZERO);
    }
}

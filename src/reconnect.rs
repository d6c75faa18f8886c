//! Reconnect schedule for long-lived channels (e.g. a progress stream).
//!
//! Each failed connection attempt asks for the next delay; a successful connection resets the
//! schedule. With an attempt limit the schedule eventually yields `None` and the caller gives up.
//!
//! ```rust
//! use std::time::Duration;
//! use lifeline::reconnect::ReconnectSchedule;
//!
//! let mut schedule = ReconnectSchedule::new().with_max_attempts(3);
//! assert_eq!(schedule.next_delay(), Some(Duration::from_secs(1)));
//! assert_eq!(schedule.next_delay(), Some(Duration::from_secs(2)));
//! assert_eq!(schedule.next_delay(), Some(Duration::from_secs(4)));
//! assert_eq!(schedule.next_delay(), None);
//! schedule.reset();
//! assert_eq!(schedule.next_delay(), Some(Duration::from_secs(1)));
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::jitter::Jitter;
use std::time::Duration;

pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    backoff: Backoff,
    jitter: Jitter,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectSchedule {
    /// 1s base doubling up to 30s, unlimited attempts.
    pub fn new() -> Self {
        Self {
            backoff: Backoff::exponential(DEFAULT_RECONNECT_BASE),
            jitter: Jitter::None,
            max_attempts: None,
            attempts: 0,
        }
        .capped(DEFAULT_RECONNECT_CAP)
    }

    /// Custom base and cap.
    pub fn with_bounds(base: Duration, cap: Duration) -> Result<Self, BackoffError> {
        Ok(Self {
            backoff: Backoff::exponential(base).with_max(cap)?,
            jitter: Jitter::None,
            max_attempts: None,
            attempts: 0,
        })
    }

    fn capped(mut self, cap: Duration) -> Self {
        if let Ok(backoff) = self.backoff.clone().with_max(cap) {
            self.backoff = backoff;
        }
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reconnect attempts scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempts >= max)
    }

    /// Delay before the next reconnect, or `None` once the attempt limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            tracing::warn!(attempts = self.attempts, "reconnect attempts exhausted");
            return None;
        }
        self.attempts += 1;
        let delay = self.jitter.apply(self.backoff.delay(self.attempts));
        tracing::debug!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        Some(delay)
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_schedule_caps_at_thirty_seconds() {
        let mut schedule = ReconnectSchedule::new();
        let delays: Vec<_> = (0..8).filter_map(|_| schedule.next_delay()).collect();
        assert_eq!(
            delays.iter().map(Duration::as_secs).collect::<Vec<_>>(),
            vec![1, 2, 4, 8, 16, 30, 30, 30]
        );
        assert!(!schedule.is_exhausted());
    }

    #[test]
    fn custom_bounds_are_validated() {
        assert!(ReconnectSchedule::with_bounds(Duration::from_secs(5), Duration::from_secs(1)).is_err());
        let mut schedule =
            ReconnectSchedule::with_bounds(Duration::from_millis(250), Duration::from_secs(1)).unwrap();
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn jitter_stays_within_delay() {
        let mut schedule = ReconnectSchedule::new().with_jitter(Jitter::full());
        for _ in 0..10 {
            let delay = schedule.next_delay().unwrap();
            assert!(delay <= DEFAULT_RECONNECT_CAP);
        }
    }
}

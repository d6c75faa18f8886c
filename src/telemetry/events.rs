use crate::classify::FailureKind;
use std::fmt;
use std::time::Duration;

/// Structured events emitted by the access layer.
///
/// Events describe what the retry engine, the refresh coordinator, the cache and the mutation
/// pipeline did. They are delivered best-effort to a [`super::TelemetrySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessEvent {
    Retry(RetryEvent),
    Refresh(RefreshEvent),
    Cache(CacheEvent),
    Mutation(MutationEvent),
}

/// Events emitted by the retry engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A failed attempt will be retried after `delay`.
    Attempt {
        /// Attempts made so far (1-indexed).
        attempt: u32,
        delay: Duration,
        kind: FailureKind,
    },
    /// The retry budget ran out.
    Exhausted { attempts: u32, kind: FailureKind },
}

/// Events emitted by the token refresh coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    /// A renewal started; this caller is the first in the queue.
    Started { target: String },
    /// Renewal succeeded and `released` queued callers were resumed.
    Succeeded { released: usize, elapsed: Duration },
    /// Renewal failed and `rejected` queued callers were rejected.
    Failed { rejected: usize, elapsed: Duration },
    /// A queued caller waited longer than the queue timeout.
    QueueTimeout { target: String, waited: Duration },
}

/// Events emitted by the request cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Hit { key: String },
    /// Served stale; a background refetch may have been started.
    Stale { key: String, refetching: bool },
    Miss { key: String },
    Invalidated { matched: usize },
    Evicted { count: usize },
    /// A background refetch failed; the stale value is kept.
    RefetchFailed { key: String, kind: Option<FailureKind> },
}

/// Events emitted when a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    Succeeded { invalidated: usize, notified: bool },
    Failed { kind: Option<FailureKind> },
}

impl fmt::Display for AccessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessEvent::Retry(event) => write!(f, "Retry::{}", event),
            AccessEvent::Refresh(event) => write!(f, "Refresh::{}", event),
            AccessEvent::Cache(event) => write!(f, "Cache::{}", event),
            AccessEvent::Mutation(event) => write!(f, "Mutation::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay, kind } => {
                write!(f, "Attempt(#{}, delay={:?}, kind={})", attempt, delay, kind)
            }
            RetryEvent::Exhausted { attempts, kind } => {
                write!(f, "Exhausted(attempts={}, kind={})", attempts, kind)
            }
        }
    }
}

impl fmt::Display for RefreshEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshEvent::Started { target } => write!(f, "Started(target={})", target),
            RefreshEvent::Succeeded { released, elapsed } => {
                write!(f, "Succeeded(released={}, elapsed={:?})", released, elapsed)
            }
            RefreshEvent::Failed { rejected, elapsed } => {
                write!(f, "Failed(rejected={}, elapsed={:?})", rejected, elapsed)
            }
            RefreshEvent::QueueTimeout { target, waited } => {
                write!(f, "QueueTimeout(target={}, waited={:?})", target, waited)
            }
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Hit { key } => write!(f, "Hit({})", key),
            CacheEvent::Stale { key, refetching } => {
                write!(f, "Stale({}, refetching={})", key, refetching)
            }
            CacheEvent::Miss { key } => write!(f, "Miss({})", key),
            CacheEvent::Invalidated { matched } => write!(f, "Invalidated(matched={})", matched),
            CacheEvent::Evicted { count } => write!(f, "Evicted(count={})", count),
            CacheEvent::RefetchFailed { key, kind } => match kind {
                Some(kind) => write!(f, "RefetchFailed({}, kind={})", key, kind),
                None => write!(f, "RefetchFailed({})", key),
            },
        }
    }
}

impl fmt::Display for MutationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationEvent::Succeeded { invalidated, notified } => {
                write!(f, "Succeeded(invalidated={}, notified={})", invalidated, notified)
            }
            MutationEvent::Failed { kind: Some(kind) } => write!(f, "Failed(kind={})", kind),
            MutationEvent::Failed { kind: None } => write!(f, "Failed"),
        }
    }
}

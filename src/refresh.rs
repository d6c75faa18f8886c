//! Single-flight credential renewal.
//!
//! The coordinator is a small state machine (`Idle`, `Refreshing`, `Failed`) plus a FIFO queue of
//! callers waiting for a fresh credential:
//!
//! - The first caller that observes an expired credential while `Idle` flips the state to
//!   `Refreshing` and starts the injected [`Renewer`]. The renewal runs on its own task, so it
//!   outlives any caller that stops waiting.
//! - While `Refreshing`, callers are only enqueued. At most one renewal is in flight.
//! - Success stores the new credential, returns to `Idle` and resolves the queue in enqueue order.
//! - Failure moves to `Failed` and rejects the queue in enqueue order. `Failed` is sticky until
//!   [`TokenRefreshCoordinator::set_credential`] or [`TokenRefreshCoordinator::reset`].
//! - A caller waiting longer than the queue timeout is evicted and rejected; the renewal keeps
//!   running.
//! - [`TokenRefreshCoordinator::reset`] aborts the in-flight renewal before returning to `Idle`.
//!
//! State checks and transitions happen inside one synchronous critical section; the lock is never
//! held across an `.await`.
//!
//! Clones share the same state.

use crate::classify::TransportFailure;
use crate::config::RefreshConfig;
use crate::error::ApiError;
use crate::telemetry::{AccessEvent, RefreshEvent, TelemetryHandle};
use crate::transport::Credential;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Default time a request may wait for an in-flight renewal.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
    Failed,
}

/// Obtains a fresh credential, typically by exchanging a refresh token.
#[async_trait]
pub trait Renewer: Send + Sync {
    async fn renew(&self) -> Result<Credential, TransportFailure>;
}

/// [`Renewer`] backed by a closure.
pub struct RenewFn<F>(F);

/// Wrap a closure returning a future as a [`Renewer`].
pub fn renew_fn<F, Fut>(f: F) -> RenewFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Credential, TransportFailure>> + Send + 'static,
{
    RenewFn(f)
}

#[async_trait]
impl<F, Fut> Renewer for RenewFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Credential, TransportFailure>> + Send + 'static,
{
    async fn renew(&self) -> Result<Credential, TransportFailure> {
        (self.0)().await
    }
}

/// Snapshot of renewal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshMetrics {
    pub total_refreshes: u64,
    pub successful_refreshes: u64,
    pub failed_refreshes: u64,
    /// Mean time settled queue entries spent waiting.
    pub average_queue_time: Duration,
    pub max_queue_size: usize,
    /// Entries evicted by the queue timeout.
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct MetricsAccumulator {
    snapshot: RefreshMetrics,
    settled: u64,
    total_wait: Duration,
}

impl MetricsAccumulator {
    fn record_wait(&mut self, waited: Duration) {
        self.settled += 1;
        self.total_wait = self.total_wait.saturating_add(waited);
        let mean = self.total_wait.as_nanos() / u128::from(self.settled);
        self.snapshot.average_queue_time = Duration::from_nanos(mean.min(u128::from(u64::MAX)) as u64);
    }
}

/// One caller blocked on renewal.
#[derive(Debug)]
struct QueuedRequest {
    id: u64,
    sender: oneshot::Sender<Result<Credential, ApiError>>,
    enqueued_at: Instant,
    retry_count: u32,
    target: String,
}

#[derive(Debug)]
struct CoordinatorState {
    phase: RefreshState,
    queue: VecDeque<QueuedRequest>,
    /// Bumped on every renewal start and on reset; stale renewal results are discarded.
    episode: u64,
    /// Renewal task of the current episode.
    renewal: Option<AbortHandle>,
    metrics: MetricsAccumulator,
}

impl CoordinatorState {
    fn enqueue(&mut self, entry: QueuedRequest) {
        self.queue.push_back(entry);
        let depth = self.queue.len();
        if depth > self.metrics.snapshot.max_queue_size {
            self.metrics.snapshot.max_queue_size = depth;
        }
    }

    fn remove(&mut self, id: u64) -> Option<QueuedRequest> {
        let idx = self.queue.iter().position(|entry| entry.id == id)?;
        self.queue.remove(idx)
    }
}

struct Shared {
    state: Mutex<CoordinatorState>,
    credential: ArcSwapOption<Credential>,
    renewer: Arc<dyn Renewer>,
    queue_timeout: Duration,
    next_id: AtomicU64,
    telemetry: TelemetryHandle,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, episode: u64, outcome: Result<Credential, String>, started: Instant) {
        let now = Instant::now();
        let (drained, result) = {
            let mut state = self.lock();
            if state.episode != episode {
                tracing::debug!(episode, "discarding renewal result from a reset session");
                return;
            }
            state.renewal = None;
            let result = match outcome {
                Ok(credential) => {
                    self.credential.store(Some(Arc::new(credential.clone())));
                    state.phase = RefreshState::Idle;
                    state.metrics.snapshot.successful_refreshes += 1;
                    Ok(credential)
                }
                Err(reason) => {
                    state.phase = RefreshState::Failed;
                    state.metrics.snapshot.failed_refreshes += 1;
                    Err(ApiError::AuthenticationFailed { reason })
                }
            };
            let drained: Vec<QueuedRequest> = state.queue.drain(..).collect();
            for entry in &drained {
                state.metrics.record_wait(now.saturating_duration_since(entry.enqueued_at));
            }
            (drained, result)
        };

        let elapsed = now.saturating_duration_since(started);
        match &result {
            Ok(_) => {
                tracing::info!(released = drained.len(), ?elapsed, "credential renewed");
                self.telemetry.emit(AccessEvent::Refresh(RefreshEvent::Succeeded {
                    released: drained.len(),
                    elapsed,
                }));
            }
            Err(err) => {
                tracing::warn!(rejected = drained.len(), ?elapsed, error = %err, "credential renewal failed");
                self.telemetry.emit(AccessEvent::Refresh(RefreshEvent::Failed {
                    rejected: drained.len(),
                    elapsed,
                }));
            }
        }

        for entry in drained {
            tracing::trace!(id = entry.id, target = %entry.target, retry_count = entry.retry_count, "releasing queued request");
            // The receiver may already be gone; its caller stopped caring.
            let _ = entry.sender.send(result.clone());
        }
    }
}

/// Removes the caller's queue entry when its wait ends for any reason, including the waiting
/// future being dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().remove(self.id);
    }
}

/// Handle to the shared renewal state. Construct once per session.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TokenRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshCoordinator")
            .field("state", &self.state())
            .field("queue_len", &self.queue_len())
            .field("queue_timeout", &self.shared.queue_timeout)
            .finish()
    }
}

impl TokenRefreshCoordinator {
    pub fn new<R: Renewer + 'static>(renewer: R) -> Self {
        Self::builder(renewer).build()
    }

    pub fn builder<R: Renewer + 'static>(renewer: R) -> CoordinatorBuilder {
        CoordinatorBuilder {
            renewer: Arc::new(renewer),
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            credential: None,
            telemetry: TelemetryHandle::disabled(),
        }
    }

    pub fn state(&self) -> RefreshState {
        self.shared.lock().phase
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn metrics(&self) -> RefreshMetrics {
        self.shared.lock().metrics.snapshot
    }

    /// Current credential, if any.
    pub fn credential(&self) -> Option<Credential> {
        self.shared.credential.load_full().map(|c| (*c).clone())
    }

    /// Install a credential (e.g. after login). Leaves `Failed`.
    pub fn set_credential(&self, credential: Credential) {
        let mut state = self.shared.lock();
        self.shared.credential.store(Some(Arc::new(credential)));
        if state.phase == RefreshState::Failed {
            state.phase = RefreshState::Idle;
        }
    }

    /// End the session: drop the credential, reject every queued caller and return to `Idle`.
    ///
    /// An in-flight renewal is aborted and its result discarded. Metrics are kept.
    pub fn reset(&self) {
        let drained: Vec<QueuedRequest> = {
            let mut state = self.shared.lock();
            self.shared.credential.store(None);
            if let Some(renewal) = state.renewal.take() {
                renewal.abort();
            }
            state.phase = RefreshState::Idle;
            state.episode += 1;
            state.queue.drain(..).collect()
        };
        tracing::info!(rejected = drained.len(), "refresh coordinator reset");
        for entry in drained {
            let _ = entry.sender.send(Err(ApiError::AuthenticationFailed {
                reason: "session was reset".into(),
            }));
        }
    }

    /// Wait for a renewed credential after `target` failed with an expired credential.
    ///
    /// `stale` is the credential the failed request carried. When the coordinator already holds
    /// a different credential (a renewal finished in the meantime) that credential is returned
    /// straight away instead of starting another renewal.
    pub async fn await_renewal(
        &self,
        target: &str,
        stale: Option<&Credential>,
        retry_count: u32,
    ) -> Result<Credential, ApiError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = oneshot::channel();
        let enqueued_at = Instant::now();

        let start_episode = {
            let mut state = self.shared.lock();
            let start = match state.phase {
                RefreshState::Failed => {
                    return Err(ApiError::AuthenticationFailed {
                        reason: "credential renewal already failed for this session".into(),
                    })
                }
                RefreshState::Refreshing => false,
                RefreshState::Idle => {
                    if let Some(current) = self.shared.credential.load_full() {
                        if stale != Some(&*current) {
                            return Ok((*current).clone());
                        }
                    }
                    true
                }
            };
            if start {
                state.phase = RefreshState::Refreshing;
                state.episode += 1;
                state.metrics.snapshot.total_refreshes += 1;
            }
            state.enqueue(QueuedRequest {
                id,
                sender,
                enqueued_at,
                retry_count,
                target: target.to_owned(),
            });
            start.then_some(state.episode)
        };

        if let Some(episode) = start_episode {
            tracing::info!(target, "credential expired; starting renewal");
            self.shared
                .telemetry
                .emit(AccessEvent::Refresh(RefreshEvent::Started { target: target.to_owned() }));
            self.spawn_renewal(episode);
        } else {
            tracing::debug!(target, "renewal in flight; request queued");
        }

        let _guard = PendingGuard { shared: &self.shared, id };
        let waited = tokio::time::timeout(self.shared.queue_timeout, &mut receiver).await;
        match waited {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(abandoned()),
            Err(_) => {
                let waited = enqueued_at.elapsed();
                let evicted = {
                    let mut state = self.shared.lock();
                    let evicted = state.remove(id).is_some();
                    if evicted {
                        state.metrics.snapshot.timeouts += 1;
                    }
                    evicted
                };
                if evicted {
                    tracing::warn!(target, ?waited, "gave up waiting for credential renewal");
                    self.shared.telemetry.emit(AccessEvent::Refresh(RefreshEvent::QueueTimeout {
                        target: target.to_owned(),
                        waited,
                    }));
                    Err(ApiError::RenewalTimeout { waited })
                } else {
                    // Settled between the deadline and the eviction attempt.
                    receiver.await.unwrap_or_else(|_| Err(abandoned()))
                }
            }
        }
    }

    fn spawn_renewal(&self, episode: u64) {
        let started = Instant::now();
        let renewer = Arc::clone(&self.shared.renewer);
        let renewal = tokio::spawn(async move { renewer.renew().await });
        {
            let mut state = self.shared.lock();
            if state.episode == episode {
                state.renewal = Some(renewal.abort_handle());
            } else {
                // Reset between the episode start and the spawn.
                renewal.abort();
            }
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let outcome = match renewal.await {
                Ok(result) => result.map_err(|failure| failure.to_string()),
                Err(join_err) => Err(format!("renewal task failed: {}", join_err)),
            };
            shared.settle(episode, outcome, started);
        });
    }
}

fn abandoned() -> ApiError {
    ApiError::AuthenticationFailed { reason: "credential renewal was abandoned".into() }
}

/// Builder for [`TokenRefreshCoordinator`].
pub struct CoordinatorBuilder {
    renewer: Arc<dyn Renewer>,
    queue_timeout: Duration,
    credential: Option<Credential>,
    telemetry: TelemetryHandle,
}

impl CoordinatorBuilder {
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn config(self, config: &RefreshConfig) -> Self {
        self.queue_timeout(config.queue_timeout())
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn build(self) -> TokenRefreshCoordinator {
        TokenRefreshCoordinator {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordinatorState {
                    phase: RefreshState::Idle,
                    queue: VecDeque::new(),
                    episode: 0,
                    renewal: None,
                    metrics: MetricsAccumulator::default(),
                }),
                credential: ArcSwapOption::new(self.credential.map(Arc::new)),
                renewer: self.renewer,
                queue_timeout: self.queue_timeout,
                next_id: AtomicU64::new(0),
                telemetry: self.telemetry,
            }),
        }
    }
}

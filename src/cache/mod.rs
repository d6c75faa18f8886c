//! Stale-while-revalidate request cache.
//!
//! Entries are keyed by [`CacheKey`] and hold the JSON body of a successful query:
//!
//! - fresh entries are served without touching the network;
//! - stale (or invalidated) entries are served immediately while one background refetch runs;
//! - misses are fetched in the foreground, with concurrent misses for a key sharing one fetch;
//! - entries past their eviction deadline are dropped unless something subscribes to them.
//!
//! Every fetch goes through the [`ApiClient`], so queries inherit its retry and token refresh
//! behavior.

mod coalesce;
pub mod key;
pub mod policy;

pub use key::CacheKey;
pub use policy::{CachePolicy, CacheTier, CacheWindow, WindowError};

use crate::client::ApiClient;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{CacheConfig, ConfigError};
use crate::error::ApiError;
use crate::telemetry::{AccessEvent, CacheEvent, TelemetryHandle};
use crate::transport::ApiRequest;
use coalesce::FetchCoalescer;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Whether a served value is within its freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Value read from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub freshness: Freshness,
    /// Clock reading of the fetch that produced the value.
    pub fetched_at: u64,
    /// Last background refetch failure, cleared by the next successful fetch.
    pub error: Option<ApiError>,
}

#[derive(Debug)]
struct CacheEntry {
    key: CacheKey,
    value: Value,
    fetched_at: u64,
    stale_at: u64,
    evict_at: u64,
    invalidated: bool,
    /// Bumped by every invalidation; fetches started under an older generation are discarded.
    generation: u64,
    fetching: bool,
    last_error: Option<ApiError>,
}

impl CacheEntry {
    fn freshness(&self, now: u64) -> Freshness {
        if self.invalidated || now >= self.stale_at {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    fn expired(&self, now: u64) -> bool {
        now >= self.evict_at
    }

    fn snapshot(&self, now: u64) -> CachedValue {
        CachedValue {
            value: self.value.clone(),
            freshness: self.freshness(now),
            fetched_at: self.fetched_at,
            error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    subscribers: HashMap<String, usize>,
}

impl CacheState {
    fn is_subscribed(&self, canonical: &str) -> bool {
        self.subscribers.get(canonical).copied().unwrap_or(0) > 0
    }

    /// Drop `canonical` if it expired with nobody subscribed. Returns true when removed.
    fn evict_if_expired(&mut self, canonical: &str, now: u64) -> bool {
        let expired = self.entries.get(canonical).is_some_and(|entry| entry.expired(now));
        if expired && !self.is_subscribed(canonical) {
            self.entries.remove(canonical);
            return true;
        }
        false
    }
}

enum Lookup {
    Fresh(Value),
    /// `refetch` carries the generation the background refetch starts under.
    Stale { value: Value, refetch: Option<u64> },
    Miss,
}

struct CacheInner {
    state: Mutex<CacheState>,
    coalescer: FetchCoalescer,
    client: ApiClient,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    telemetry: TelemetryHandle,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle; clones share entries.
#[derive(Clone)]
pub struct RequestCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("entries", &self.len())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl RequestCache {
    pub fn new(client: ApiClient) -> Self {
        Self::builder(client).build()
    }

    pub fn builder(client: ApiClient) -> RequestCacheBuilder {
        RequestCacheBuilder {
            client,
            policy: CachePolicy::default(),
            clock: Arc::new(MonotonicClock::default()),
            telemetry: TelemetryHandle::disabled(),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.inner.policy
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read an entry without fetching. Expired, unsubscribed entries are dropped on access.
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let canonical = key.canonical();
        let now = self.inner.clock.now_millis();
        let mut state = self.inner.lock();
        state.evict_if_expired(&canonical, now);
        state.entries.get(&canonical).map(|entry| entry.snapshot(now))
    }

    /// Store `value` as freshly fetched.
    pub fn set(&self, key: CacheKey, value: Value) {
        self.store(key, value, None);
    }

    /// Insert a fetched value. With `started_under` set, the value is dropped when the entry was
    /// invalidated after the fetch began. Returns whether the value was stored.
    fn store(&self, key: CacheKey, value: Value, started_under: Option<u64>) -> bool {
        let now = self.inner.clock.now_millis();
        let window = self.inner.policy.window_for(&key);
        let canonical = key.canonical();
        let mut state = self.inner.lock();
        let generation = state.entries.get(&canonical).map_or(0, |entry| entry.generation);
        if started_under.is_some_and(|started| started != generation) {
            return false;
        }
        let entry = CacheEntry {
            fetched_at: now,
            stale_at: now.saturating_add(window.stale_after().as_millis() as u64),
            evict_at: now.saturating_add(window.evict_after().as_millis() as u64),
            invalidated: false,
            generation,
            fetching: false,
            last_error: None,
            value,
            key,
        };
        state.entries.insert(canonical, entry);
        true
    }

    fn generation(&self, canonical: &str) -> u64 {
        self.inner.lock().entries.get(canonical).map_or(0, |entry| entry.generation)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.remove(&key.canonical()).is_some()
    }

    /// Mark the entry for exactly `key` stale. Returns the number of entries matched.
    pub fn invalidate(&self, key: &CacheKey) -> usize {
        self.invalidate_where(|candidate| candidate == key)
    }

    /// Mark every entry whose key starts with `prefix` stale.
    pub fn invalidate_prefix(&self, prefix: &CacheKey) -> usize {
        self.invalidate_where(|candidate| candidate.starts_with(prefix))
    }

    /// Mark every entry whose key satisfies `predicate` stale.
    ///
    /// The next read of a matched entry starts a new refetch even if one is already running;
    /// results of fetches that began before the invalidation are discarded. Invalidating an
    /// already invalidated entry leaves what readers see unchanged but still counts as a match.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&CacheKey) -> bool,
    {
        let matched = {
            let mut state = self.inner.lock();
            let mut matched = 0;
            for entry in state.entries.values_mut().filter(|entry| predicate(&entry.key)) {
                entry.invalidated = true;
                entry.generation += 1;
                entry.fetching = false;
                matched += 1;
            }
            matched
        };
        tracing::debug!(matched, "cache entries invalidated");
        self.inner.telemetry.emit(AccessEvent::Cache(CacheEvent::Invalidated { matched }));
        matched
    }

    /// Keep `key` from being evicted while the returned guard lives.
    pub fn subscribe(&self, key: &CacheKey) -> Subscription {
        let canonical = key.canonical();
        *self.inner.lock().subscribers.entry(canonical.clone()).or_insert(0) += 1;
        Subscription { inner: Arc::clone(&self.inner), canonical }
    }

    /// Drop every expired, unsubscribed entry. Returns the number removed.
    pub fn gc(&self) -> usize {
        let now = self.inner.clock.now_millis();
        let count = {
            let mut state = self.inner.lock();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(canonical, entry)| entry.expired(now) && !state.is_subscribed(canonical))
                .map(|(canonical, _)| canonical.clone())
                .collect();
            for canonical in &expired {
                state.entries.remove(canonical);
            }
            expired.len()
        };
        if count > 0 {
            tracing::debug!(count, "evicted expired cache entries");
            self.inner.telemetry.emit(AccessEvent::Cache(CacheEvent::Evicted { count }));
        }
        count
    }

    /// Cached query decoded into `T`.
    pub async fn query<T: DeserializeOwned>(&self, key: CacheKey, request: ApiRequest) -> Result<T, ApiError> {
        let value = self.query_value(key, request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Cached query returning the raw JSON body.
    ///
    /// Fresh entries are returned as-is. Stale entries are returned and refreshed in the
    /// background. Misses are fetched in the foreground; a failure is returned to the caller.
    pub async fn query_value(&self, key: CacheKey, request: ApiRequest) -> Result<Value, ApiError> {
        match self.lookup(&key) {
            Lookup::Fresh(value) => {
                tracing::trace!(key = %key, "cache hit");
                self.inner.telemetry.emit(AccessEvent::Cache(CacheEvent::Hit { key: key.to_string() }));
                Ok(value)
            }
            Lookup::Stale { value, refetch } => {
                tracing::debug!(key = %key, refetch = refetch.is_some(), "serving stale entry");
                self.inner.telemetry.emit(AccessEvent::Cache(CacheEvent::Stale {
                    key: key.to_string(),
                    refetching: refetch.is_some(),
                }));
                if let Some(generation) = refetch {
                    self.spawn_refetch(key, request, generation);
                }
                Ok(value)
            }
            Lookup::Miss => {
                tracing::debug!(key = %key, "cache miss");
                self.inner.telemetry.emit(AccessEvent::Cache(CacheEvent::Miss { key: key.to_string() }));
                self.fetch_coalesced(key, &request).await
            }
        }
    }

    /// Warm `key` unless a fresh entry is already present.
    pub async fn prefetch(&self, key: CacheKey, request: ApiRequest) -> Result<(), ApiError> {
        if matches!(self.get(&key), Some(CachedValue { freshness: Freshness::Fresh, .. })) {
            return Ok(());
        }
        self.fetch_coalesced(key, &request).await.map(|_| ())
    }

    fn lookup(&self, key: &CacheKey) -> Lookup {
        let canonical = key.canonical();
        let now = self.inner.clock.now_millis();
        let mut state = self.inner.lock();
        state.evict_if_expired(&canonical, now);
        let Some(entry) = state.entries.get_mut(&canonical) else {
            return Lookup::Miss;
        };
        match entry.freshness(now) {
            Freshness::Fresh => Lookup::Fresh(entry.value.clone()),
            Freshness::Stale => {
                let refetch = (!entry.fetching).then_some(entry.generation);
                entry.fetching = true;
                Lookup::Stale { value: entry.value.clone(), refetch }
            }
        }
    }

    async fn fetch_coalesced(&self, key: CacheKey, request: &ApiRequest) -> Result<Value, ApiError> {
        let canonical = key.canonical();
        let _permit = self.inner.coalescer.acquire(&canonical).await;
        // Another caller may have filled the entry while this one waited.
        if let Some(cached) = self.get(&key).filter(|cached| cached.freshness == Freshness::Fresh) {
            return Ok(cached.value);
        }
        let generation = self.generation(&canonical);
        let value = self.fetch(request).await?;
        if !self.store(key.clone(), value.clone(), Some(generation)) {
            tracing::debug!(key = %key, "entry invalidated during fetch; result not cached");
        }
        Ok(value)
    }

    async fn fetch(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        self.inner.client.query(request).await.map(|response| response.body)
    }

    fn spawn_refetch(&self, key: CacheKey, request: ApiRequest, generation: u64) {
        let cache = self.clone();
        tokio::spawn(async move {
            match cache.fetch(&request).await {
                Ok(value) => {
                    if !cache.store(key.clone(), value, Some(generation)) {
                        tracing::debug!(key = %key, generation, "discarding refetch superseded by invalidation");
                    }
                }
                Err(err) => cache.record_refetch_failure(&key, err, generation),
            }
        });
    }

    fn record_refetch_failure(&self, key: &CacheKey, err: ApiError, generation: u64) {
        tracing::warn!(key = %key, error = %err, "background refetch failed");
        self.inner.telemetry.emit(AccessEvent::Cache(CacheEvent::RefetchFailed {
            key: key.to_string(),
            kind: err.kind(),
        }));
        if let Some(entry) = self.inner.lock().entries.get_mut(&key.canonical()) {
            if entry.generation == generation {
                entry.fetching = false;
                entry.last_error = Some(err);
            }
        }
    }
}

/// Subscription guard returned by [`RequestCache::subscribe`].
pub struct Subscription {
    inner: Arc<CacheInner>,
    canonical: String,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.canonical).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if let Some(count) = state.subscribers.get_mut(&self.canonical) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.subscribers.remove(&self.canonical);
            }
        }
    }
}

/// Builder for [`RequestCache`].
pub struct RequestCacheBuilder {
    client: ApiClient,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    telemetry: TelemetryHandle,
}

impl RequestCacheBuilder {
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(self, config: &CacheConfig) -> Result<Self, ConfigError> {
        Ok(self.policy(config.policy()?))
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn build(self) -> RequestCache {
        RequestCache {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                coalescer: FetchCoalescer::default(),
                client: self.client,
                policy: self.policy,
                clock: self.clock,
                telemetry: self.telemetry,
            }),
        }
    }
}

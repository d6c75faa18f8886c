//! Post-settle pipeline for mutations.
//!
//! Success: invalidate the configured cache keys, notify per configuration, log the outcome.
//! Failure: notify exactly once at error severity (server message, then configured message,
//! then a generic one) and hand the original error back unchanged.

use crate::cache::{CacheKey, RequestCache};
use crate::classify::GENERIC_MESSAGE;
use crate::error::ApiError;
use crate::telemetry::{AccessEvent, MutationEvent, TelemetryHandle};
use crate::transport::{ApiRequest, ApiResponse};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Message shown on success when nothing more specific is configured.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Changes saved.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Success,
    Error,
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Success => "success",
            Severity::Error => "error",
            Severity::Info => "info",
            Severity::Warning => "warning",
        };
        f.write_str(s)
    }
}

/// User notification sink (toasts, banners).
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn info(&self, message: &str);
    fn warning(&self, message: &str);

    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Success => self.success(message),
            Severity::Error => self.error(message),
            Severity::Info => self.info(message),
            Severity::Warning => self.warning(message),
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn success(&self, message: &str) {
        tracing::info!(severity = "success", message, "notification");
    }

    fn error(&self, message: &str) {
        tracing::error!(severity = "error", message, "notification");
    }

    fn info(&self, message: &str) {
        tracing::info!(severity = "info", message, "notification");
    }

    fn warning(&self, message: &str) {
        tracing::warn!(severity = "warning", message, "notification");
    }
}

/// Records notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    seen: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(Severity, String)> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.notifications().iter().filter(|(s, _)| *s == severity).count()
    }

    fn record(&self, severity: Severity, message: &str) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((severity, message.to_owned()));
    }
}

impl Notifier for MemoryNotifier {
    fn success(&self, message: &str) {
        self.record(Severity::Success, message);
    }

    fn error(&self, message: &str) {
        self.record(Severity::Error, message);
    }

    fn info(&self, message: &str) {
        self.record(Severity::Info, message);
    }

    fn warning(&self, message: &str) {
        self.record(Severity::Warning, message);
    }
}

/// What to show when a mutation succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SuccessNotice {
    Silent,
    /// Show [`MutationConfig::default_message`].
    #[default]
    Default,
    /// Show this message; an empty message shows nothing.
    Custom(String),
}

impl From<bool> for SuccessNotice {
    fn from(notify: bool) -> Self {
        if notify {
            SuccessNotice::Default
        } else {
            SuccessNotice::Silent
        }
    }
}

impl From<String> for SuccessNotice {
    fn from(message: String) -> Self {
        SuccessNotice::Custom(message)
    }
}

impl From<&str> for SuccessNotice {
    fn from(message: &str) -> Self {
        SuccessNotice::Custom(message.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationConfig {
    /// Exact keys marked stale on success.
    pub invalidate_keys: Vec<CacheKey>,
    pub notify_on_success: SuccessNotice,
    pub default_message: String,
    /// Shown on failure when the server supplied no message.
    pub error_message: Option<String>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            invalidate_keys: Vec::new(),
            notify_on_success: SuccessNotice::Default,
            default_message: DEFAULT_SUCCESS_MESSAGE.to_owned(),
            error_message: None,
        }
    }
}

impl MutationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(mut self, key: impl Into<CacheKey>) -> Self {
        self.invalidate_keys.push(key.into());
        self
    }

    pub fn notify(mut self, notice: impl Into<SuccessNotice>) -> Self {
        self.notify_on_success = notice.into();
        self
    }

    pub fn default_message(mut self, message: impl Into<String>) -> Self {
        self.default_message = message.into();
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Message to show on success, if any.
    fn success_message(&self) -> Option<&str> {
        match &self.notify_on_success {
            SuccessNotice::Silent => None,
            SuccessNotice::Default => Some(self.default_message.as_str()),
            SuccessNotice::Custom(message) if message.is_empty() => None,
            SuccessNotice::Custom(message) => Some(message.as_str()),
        }
    }

    fn failure_message(&self, err: &ApiError) -> String {
        err.server_message()
            .map(str::to_owned)
            .or_else(|| self.error_message.clone())
            .unwrap_or_else(|| GENERIC_MESSAGE.to_owned())
    }
}

/// Shared success/failure handling for every mutation.
#[derive(Clone)]
pub struct MutationPipeline {
    cache: RequestCache,
    notifier: Option<Arc<dyn Notifier>>,
    telemetry: TelemetryHandle,
}

impl fmt::Debug for MutationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationPipeline")
            .field("cache", &self.cache)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

impl MutationPipeline {
    pub fn new(cache: RequestCache) -> Self {
        Self { cache, notifier: None, telemetry: TelemetryHandle::disabled() }
    }

    pub fn with_notifier<N: Notifier + 'static>(mut self, notifier: N) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Run the success or failure half for a settled mutation and pass the outcome through.
    pub fn on_mutation_settled<T>(&self, outcome: Result<T, ApiError>, config: &MutationConfig) -> Result<T, ApiError> {
        match outcome {
            Ok(value) => {
                self.on_success(config);
                Ok(value)
            }
            Err(err) => {
                self.on_failure(&err, config);
                Err(err)
            }
        }
    }

    /// Invalidate configured keys and notify. Returns the number of entries invalidated.
    pub fn on_success(&self, config: &MutationConfig) -> usize {
        let invalidated: usize = config.invalidate_keys.iter().map(|key| self.cache.invalidate(key)).sum();
        let message = config.success_message();
        if let Some(message) = message {
            self.deliver(Severity::Success, message);
        }
        tracing::info!(
            keys = config.invalidate_keys.len(),
            invalidated,
            notified = message.is_some(),
            "mutation succeeded"
        );
        self.telemetry.emit(AccessEvent::Mutation(MutationEvent::Succeeded {
            invalidated,
            notified: message.is_some(),
        }));
        invalidated
    }

    /// Notify the failure once at error severity.
    pub fn on_failure(&self, err: &ApiError, config: &MutationConfig) {
        let message = config.failure_message(err);
        tracing::warn!(error = %err, message = %message, "mutation failed");
        self.deliver(Severity::Error, &message);
        self.telemetry.emit(AccessEvent::Mutation(MutationEvent::Failed { kind: err.kind() }));
    }

    /// Send `request` as a mutation and settle it.
    pub async fn run(&self, request: &ApiRequest, config: &MutationConfig) -> Result<ApiResponse, ApiError> {
        let outcome = self.cache.client().mutate(request).await;
        self.on_mutation_settled(outcome, config)
    }

    fn deliver(&self, severity: Severity, message: &str) {
        match &self.notifier {
            Some(notifier) => notifier.notify(severity, message),
            None => LogNotifier.notify(severity, message),
        }
    }
}

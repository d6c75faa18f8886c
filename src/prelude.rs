//! Convenient re-exports for common Lifeline types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    cache::{CacheKey, CachePolicy, CacheTier, CacheWindow, RequestCache, Subscription},
    classify::{classify, user_message, FailureKind, TransportFailure},
    client::ApiClient,
    config::{CallClass, ClientConfig},
    error::ApiError,
    jitter::Jitter,
    pipeline::{LogNotifier, MutationConfig, MutationPipeline, Notifier, SuccessNotice},
    refresh::{renew_fn, RefreshState, Renewer, TokenRefreshCoordinator},
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    telemetry::{AccessEvent, TelemetryHandle},
    transport::{ApiRequest, ApiResponse, Credential, Method, Transport},
};

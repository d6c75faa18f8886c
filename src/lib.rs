#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Lifeline
//!
//! Resilient API access layer for dashboard clients: failure classification, retry with
//! backoff, single-flight credential renewal, a stale-while-revalidate request cache and a
//! uniform post-mutation pipeline.
//!
//! ## Features
//!
//! - **Failure taxonomy**: every failed call maps to exactly one [`FailureKind`]
//! - **Retry policies** with exponential backoff, per-kind budgets and `Retry-After` support
//! - **Token refresh coordination**: N concurrent expired-credential failures trigger one renewal
//! - **Request cache** with freshness tiers, prefix invalidation and fetch coalescing
//! - **Mutation pipeline** for cache invalidation and user notifications
//! - **Telemetry** as structured events delivered to `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::{
//!     renew_fn, ApiClient, ApiRequest, ApiResponse, Credential, TokenRefreshCoordinator,
//!     Transport, TransportFailure,
//! };
//! use async_trait::async_trait;
//!
//! struct Backend;
//!
//! #[async_trait]
//! impl Transport for Backend {
//!     async fn execute(
//!         &self,
//!         _request: &ApiRequest,
//!         credential: Option<&Credential>,
//!     ) -> Result<ApiResponse, TransportFailure> {
//!         match credential.map(|c| c.access_token()) {
//!             Some("fresh") => Ok(ApiResponse::ok(serde_json::json!({ "schools": [] }))),
//!             _ => Err(TransportFailure::status(401)),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = TokenRefreshCoordinator::builder(renew_fn(|| async {
//!         Ok(Credential::bearer("fresh"))
//!     }))
//!     .credential(Credential::bearer("expired"))
//!     .build();
//!
//!     let client = ApiClient::builder(Backend).coordinator(coordinator).build().unwrap();
//!     let response = client.query(&ApiRequest::get("/schools")).await.unwrap();
//!     assert_eq!(response.status, 200);
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod classify;
pub mod client;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod jitter;
pub mod pipeline;
pub mod prelude;
pub mod reconnect;
pub mod refresh;
pub mod retry;
pub mod sleeper;
pub mod telemetry;
pub mod transport;

// Re-exports
pub use backoff::Backoff;
pub use cache::{CacheKey, CachePolicy, CacheTier, CachedValue, Freshness, RequestCache};
pub use classify::{classify, FailureKind, TransportFailure};
pub use client::{ApiClient, ApiClientBuilder};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{CallClass, ClientConfig, ConfigError};
pub use envelope::ErrorEnvelope;
pub use error::ApiError;
pub use jitter::Jitter;
pub use pipeline::{MutationConfig, MutationPipeline, Notifier, SuccessNotice};
pub use reconnect::ReconnectSchedule;
pub use refresh::{renew_fn, RefreshMetrics, RefreshState, Renewer, TokenRefreshCoordinator};
pub use retry::{RetryDecision, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use transport::{ApiRequest, ApiResponse, Credential, Method, Transport};

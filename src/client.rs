//! Resilient client: transport, retry engine and token refresh composed into one call path.
//!
//! Each attempt goes to the transport with the current credential. An expired credential is
//! handed to the [`TokenRefreshCoordinator`] and the request is replayed exactly once with the
//! renewed credential. Every other failure goes to the retry engine of the call's class.

use crate::classify::{classify, FailureKind, TransportFailure};
use crate::config::{CallClass, RetryConfig};
use crate::error::ApiError;
use crate::refresh::TokenRefreshCoordinator;
use crate::retry::{BuildError, RetryPolicy};
use crate::telemetry::TelemetryHandle;
use crate::transport::{ApiRequest, ApiResponse, Credential, Transport};
use serde::de::DeserializeOwned;
use std::sync::Arc;

struct ClientInner {
    transport: Arc<dyn Transport>,
    coordinator: Option<TokenRefreshCoordinator>,
    /// Used when no coordinator manages credentials.
    credential: Option<Credential>,
    query_policy: RetryPolicy,
    mutation_policy: RetryPolicy,
}

/// Cloneable handle; clones share transport, policies and coordinator.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("coordinator", &self.inner.coordinator)
            .field("query_policy", &self.inner.query_policy)
            .field("mutation_policy", &self.inner.mutation_policy)
            .finish()
    }
}

impl ApiClient {
    pub fn builder<T: Transport + 'static>(transport: T) -> ApiClientBuilder {
        ApiClientBuilder {
            transport: Arc::new(transport),
            coordinator: None,
            credential: None,
            retry: RetryConfig::default(),
            query_policy: None,
            mutation_policy: None,
            telemetry: TelemetryHandle::disabled(),
        }
    }

    pub fn coordinator(&self) -> Option<&TokenRefreshCoordinator> {
        self.inner.coordinator.as_ref()
    }

    pub fn policy(&self, class: CallClass) -> &RetryPolicy {
        match class {
            CallClass::Query => &self.inner.query_policy,
            CallClass::Mutation => &self.inner.mutation_policy,
        }
    }

    /// Issue `request` with the retry budget of `class`.
    pub async fn send(&self, request: &ApiRequest, class: CallClass) -> Result<ApiResponse, ApiError> {
        let result = self
            .policy(class)
            .execute(request.is_idempotent(), |attempt| self.attempt(request, attempt))
            .await;
        if let Err(err) = &result {
            tracing::warn!(request = %request, error = %err, "request failed");
        }
        result
    }

    pub async fn query(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.send(request, CallClass::Query).await
    }

    pub async fn mutate(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.send(request, CallClass::Mutation).await
    }

    /// Query and decode the response body.
    pub async fn query_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let response = self.query(request).await?;
        Ok(response.json()?)
    }

    fn current_credential(&self) -> Option<Credential> {
        match &self.inner.coordinator {
            Some(coordinator) => coordinator.credential(),
            None => self.inner.credential.clone(),
        }
    }

    async fn attempt(&self, request: &ApiRequest, attempt: u32) -> Result<ApiResponse, ApiError> {
        let credential = self.current_credential();
        let failure = match self.inner.transport.execute(request, credential.as_ref()).await {
            Ok(response) => return Ok(response),
            Err(failure) => failure,
        };
        let kind = classify(&failure);
        let coordinator = match &self.inner.coordinator {
            Some(coordinator) if kind == FailureKind::AuthExpired => coordinator,
            _ => return Err(ApiError::Request { kind, failure }),
        };

        let renewed = coordinator.await_renewal(&request.target, credential.as_ref(), attempt).await?;
        tracing::debug!(request = %request, attempt, "replaying with renewed credential");
        match self.inner.transport.execute(request, Some(&renewed)).await {
            Ok(response) => Ok(response),
            Err(failure) => Err(replay_failure(request, failure)),
        }
    }
}

/// A replayed request never re-enters the refresh queue.
fn replay_failure(request: &ApiRequest, failure: TransportFailure) -> ApiError {
    match classify(&failure) {
        FailureKind::AuthExpired => {
            tracing::warn!(request = %request, "renewed credential rejected");
            ApiError::AuthenticationFailed {
                reason: format!("renewed credential rejected for {}", request),
            }
        }
        kind => ApiError::Request { kind, failure },
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    transport: Arc<dyn Transport>,
    coordinator: Option<TokenRefreshCoordinator>,
    credential: Option<Credential>,
    retry: RetryConfig,
    query_policy: Option<RetryPolicy>,
    mutation_policy: Option<RetryPolicy>,
    telemetry: TelemetryHandle,
}

impl ApiClientBuilder {
    pub fn coordinator(mut self, coordinator: TokenRefreshCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Fixed credential for clients without a coordinator.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Budgets for policies not set explicitly.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn query_policy(mut self, policy: RetryPolicy) -> Self {
        self.query_policy = Some(policy);
        self
    }

    pub fn mutation_policy(mut self, policy: RetryPolicy) -> Self {
        self.mutation_policy = Some(policy);
        self
    }

    /// Telemetry for policies derived from the retry configuration.
    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn build(mut self) -> Result<ApiClient, BuildError> {
        let query_policy = match self.query_policy.take() {
            Some(policy) => policy,
            None => self.derive(CallClass::Query)?,
        };
        let mutation_policy = match self.mutation_policy.take() {
            Some(policy) => policy,
            None => self.derive(CallClass::Mutation)?,
        };
        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                coordinator: self.coordinator,
                credential: self.credential,
                query_policy,
                mutation_policy,
            }),
        })
    }

    fn derive(&self, class: CallClass) -> Result<RetryPolicy, BuildError> {
        Ok(RetryPolicy::from_config(&self.retry, class)?.with_telemetry(self.telemetry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::renew_fn;
    use crate::sleeper::InstantSleeper;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Accepts only the token named `valid`, records every token it saw.
    struct TokenGate {
        valid: &'static str,
        seen: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Transport for TokenGate {
        async fn execute(
            &self,
            _request: &ApiRequest,
            credential: Option<&Credential>,
        ) -> Result<ApiResponse, TransportFailure> {
            let token = credential.map(|c| c.access_token().to_owned());
            self.seen.lock().unwrap().push(token.clone());
            match token.as_deref() {
                Some(t) if t == self.valid => Ok(ApiResponse::ok(json!({ "ok": true }))),
                _ => Err(TransportFailure::status(401)),
            }
        }
    }

    fn instant_policy() -> RetryPolicy {
        RetryPolicy::builder().with_sleeper(InstantSleeper).build().unwrap()
    }

    #[tokio::test]
    async fn expired_credential_is_renewed_and_replayed() {
        let gate = Arc::new(TokenGate { valid: "fresh", seen: Mutex::new(Vec::new()) });
        let coordinator = TokenRefreshCoordinator::builder(renew_fn(|| async {
            Ok(Credential::bearer("fresh"))
        }))
        .credential(Credential::bearer("expired"))
        .build();
        let client = ApiClient::builder(gate.clone())
            .coordinator(coordinator.clone())
            .query_policy(instant_policy())
            .build()
            .unwrap();

        let response = client.query(&ApiRequest::get("/schools")).await.unwrap();
        assert_eq!(response.body, json!({ "ok": true }));
        assert_eq!(
            *gate.seen.lock().unwrap(),
            vec![Some("expired".to_owned()), Some("fresh".to_owned())]
        );
        assert_eq!(coordinator.metrics().successful_refreshes, 1);
    }

    #[tokio::test]
    async fn second_rejection_is_terminal() {
        let gate = Arc::new(TokenGate { valid: "never", seen: Mutex::new(Vec::new()) });
        let coordinator = TokenRefreshCoordinator::builder(renew_fn(|| async {
            Ok(Credential::bearer("fresh"))
        }))
        .credential(Credential::bearer("expired"))
        .build();
        let client = ApiClient::builder(gate.clone())
            .coordinator(coordinator)
            .query_policy(instant_policy())
            .build()
            .unwrap();

        let err = client.query(&ApiRequest::get("/schools")).await.unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(gate.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn without_coordinator_401_surfaces_as_auth_expired() {
        let gate = TokenGate { valid: "fresh", seen: Mutex::new(Vec::new()) };
        let client = ApiClient::builder(gate)
            .credential(Credential::bearer("expired"))
            .query_policy(instant_policy())
            .build()
            .unwrap();
        let err = client.query(&ApiRequest::get("/schools")).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::AuthExpired));
    }

    #[tokio::test]
    async fn query_json_decodes_body() {
        let gate = TokenGate { valid: "t", seen: Mutex::new(Vec::new()) };
        let client = ApiClient::builder(gate).credential(Credential::bearer("t")).build().unwrap();
        let body: serde_json::Value = client.query_json(&ApiRequest::get("/x")).await.unwrap();
        assert_eq!(body["ok"], json!(true));
    }

    #[test]
    fn policies_follow_retry_config() {
        let gate = TokenGate { valid: "t", seen: Mutex::new(Vec::new()) };
        let config = RetryConfig { max_attempts: 5, ..RetryConfig::default() };
        let client = ApiClient::builder(gate).retry_config(config).build().unwrap();
        assert_eq!(client.policy(CallClass::Query).max_attempts(), 5);
        assert_eq!(client.policy(CallClass::Mutation).backoff_delay(10), std::time::Duration::from_secs(30));
        assert_eq!(client.policy(CallClass::Query).backoff_delay(10), std::time::Duration::from_secs(10));
    }
}

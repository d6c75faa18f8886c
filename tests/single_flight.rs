mod common;

use common::ScriptedTransport;
use futures::future::join_all;
use lifeline::{
    renew_fn, ApiClient, ApiError, ApiRequest, Credential, RefreshState, RetryPolicy,
    TokenRefreshCoordinator, TransportFailure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn coordinator(
    renewals: Arc<AtomicUsize>,
    latency: Duration,
    outcome: Result<&'static str, u16>,
) -> TokenRefreshCoordinator {
    TokenRefreshCoordinator::builder(renew_fn(move || {
        let renewals = renewals.clone();
        async move {
            renewals.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            match outcome {
                Ok(token) => Ok(Credential::bearer(token)),
                Err(status) => Err(TransportFailure::status(status).with_message("refresh rejected")),
            }
        }
    }))
    .credential(Credential::bearer("expired"))
    .build()
}

fn client(transport: ScriptedTransport, coordinator: TokenRefreshCoordinator) -> ApiClient {
    let single = RetryPolicy::builder().max_attempts(1).rate_limit_max_attempts(1).build().unwrap();
    ApiClient::builder(transport).coordinator(coordinator).query_policy(single).build().unwrap()
}

#[tokio::test(start_paused = true)]
async fn concurrent_expired_requests_trigger_one_renewal() {
    common::init_tracing();
    let renewals = Arc::new(AtomicUsize::new(0));
    let transport = ScriptedTransport::new().accept_token("fresh");
    let coordinator = coordinator(renewals.clone(), Duration::from_millis(150), Ok("fresh"));
    let client = client(transport.clone(), coordinator.clone());

    let targets: Vec<String> = (0..5).map(|i| format!("/schools/{}", i)).collect();
    let requests: Vec<ApiRequest> = targets.iter().map(ApiRequest::get).collect();
    let results = join_all(requests.iter().map(|r| client.query(r))).await;

    assert_eq!(renewals.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(coordinator.state(), RefreshState::Idle);

    let calls = transport.calls();
    let first_round: Vec<_> =
        calls.iter().filter(|c| c.token.as_deref() == Some("expired")).map(|c| c.target.clone()).collect();
    let replays: Vec<_> =
        calls.iter().filter(|c| c.token.as_deref() == Some("fresh")).map(|c| c.target.clone()).collect();
    assert_eq!(first_round, targets);
    assert_eq!(replays, first_round, "replays follow enqueue order");
}

#[tokio::test(start_paused = true)]
async fn renewal_metrics_for_three_queued_callers() {
    let renewals = Arc::new(AtomicUsize::new(0));
    let transport = ScriptedTransport::new().accept_token("fresh");
    let coordinator = coordinator(renewals, Duration::from_millis(150), Ok("fresh"));
    let client = client(transport, coordinator.clone());

    let requests: Vec<ApiRequest> = ["/a", "/b", "/c"].into_iter().map(ApiRequest::get).collect();
    let results = join_all(requests.iter().map(|r| client.query(r))).await;
    assert!(results.iter().all(Result::is_ok));

    let metrics = coordinator.metrics();
    assert_eq!(metrics.total_refreshes, 1);
    assert_eq!(metrics.successful_refreshes, 1);
    assert_eq!(metrics.failed_refreshes, 0);
    assert_eq!(metrics.max_queue_size, 3);
    assert_eq!(metrics.timeouts, 0);
    let avg = metrics.average_queue_time;
    assert!(
        avg >= Duration::from_millis(150) && avg < Duration::from_millis(160),
        "average queue time {:?}",
        avg
    );
}

#[tokio::test(start_paused = true)]
async fn renewal_failure_rejects_every_caller_and_sticks() {
    let renewals = Arc::new(AtomicUsize::new(0));
    let transport = ScriptedTransport::new().accept_token("fresh");
    let coordinator = coordinator(renewals.clone(), Duration::from_millis(50), Err(400));
    let client = client(transport.clone(), coordinator.clone());

    let requests: Vec<ApiRequest> = ["/a", "/b", "/c"].into_iter().map(ApiRequest::get).collect();
    let results = join_all(requests.iter().map(|r| client.query(r))).await;
    assert!(results.iter().all(|r| matches!(r, Err(ApiError::AuthenticationFailed { .. }))));
    assert_eq!(coordinator.state(), RefreshState::Failed);
    assert_eq!(coordinator.metrics().failed_refreshes, 1);

    // Sticky: another expired request is rejected without a second renewal.
    let err = client.query(&ApiRequest::get("/d")).await.unwrap_err();
    assert!(err.is_auth_failure());
    assert_eq!(renewals.load(Ordering::SeqCst), 1);
    assert!(transport.calls().iter().all(|c| c.token.as_deref() == Some("expired")));

    // Logging in again clears the failure.
    coordinator.set_credential(Credential::bearer("fresh"));
    assert!(client.query(&ApiRequest::get("/d")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn slow_renewal_times_out_queued_callers() {
    let renewals = Arc::new(AtomicUsize::new(0));
    let transport = ScriptedTransport::new().accept_token("fresh");
    let coordinator = TokenRefreshCoordinator::builder(renew_fn({
        let renewals = renewals.clone();
        move || {
            let renewals = renewals.clone();
            async move {
                renewals.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(12)).await;
                Ok(Credential::bearer("fresh"))
            }
        }
    }))
    .credential(Credential::bearer("expired"))
    .queue_timeout(Duration::from_secs(10))
    .build();
    let client = client(transport, coordinator.clone());

    let requests: Vec<ApiRequest> = ["/a", "/b"].into_iter().map(ApiRequest::get).collect();
    let results = join_all(requests.iter().map(|r| client.query(r))).await;
    assert!(results.iter().all(|r| matches!(r, Err(ApiError::RenewalTimeout { .. }))));
    assert_eq!(coordinator.metrics().timeouts, 2);

    // The renewal itself was not cancelled.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(coordinator.state(), RefreshState::Idle);
    assert!(client.query(&ApiRequest::get("/a")).await.is_ok());
    assert_eq!(renewals.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn request_after_renewal_uses_new_credential_without_renewing() {
    let renewals = Arc::new(AtomicUsize::new(0));
    let transport = ScriptedTransport::new().accept_token("fresh");
    let coordinator = coordinator(renewals.clone(), Duration::from_millis(10), Ok("fresh"));
    let client = client(transport.clone(), coordinator);

    client.query(&ApiRequest::get("/a")).await.unwrap();
    client.query(&ApiRequest::get("/b")).await.unwrap();
    assert_eq!(renewals.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls_to("/b").len(), 1);
}

//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use lifeline::{ApiRequest, ApiResponse, Credential, Transport, TransportFailure};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One request as seen by the transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub target: String,
    pub token: Option<String>,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    steps: HashMap<String, VecDeque<Result<Value, TransportFailure>>>,
    accepted_token: Option<String>,
    latency: Duration,
    calls: Vec<Call>,
}

/// Transport answering from per-target scripts.
///
/// - With an accepted token set, any other credential (or none) gets a 401 first.
/// - Otherwise the next scripted step for the target is returned.
/// - With no script left, the target echoes `{"target": ..}` with 200.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_token(self, token: &str) -> Self {
        self.script.lock().unwrap().accepted_token = Some(token.to_owned());
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.script.lock().unwrap().latency = latency;
        self
    }

    pub fn respond(&self, target: &str, body: Value) -> &Self {
        self.push(target, Ok(body))
    }

    pub fn fail(&self, target: &str, failure: TransportFailure) -> &Self {
        self.push(target, Err(failure))
    }

    fn push(&self, target: &str, step: Result<Value, TransportFailure>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .steps
            .entry(target.to_owned())
            .or_default()
            .push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, target: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.target == target).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse, TransportFailure> {
        let token = credential.map(|c| c.access_token().to_owned());
        let latency = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(Call {
                target: request.target.clone(),
                token: token.clone(),
                at: Instant::now(),
            });
            script.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut script = self.script.lock().unwrap();
        if let Some(accepted) = &script.accepted_token {
            if token.as_deref() != Some(accepted.as_str()) {
                return Err(TransportFailure::status(401));
            }
        }
        match script.steps.get_mut(&request.target).and_then(VecDeque::pop_front) {
            Some(Ok(body)) => Ok(ApiResponse::ok(body)),
            Some(Err(failure)) => Err(failure),
            None => Ok(ApiResponse::ok(json!({ "target": request.target }))),
        }
    }
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

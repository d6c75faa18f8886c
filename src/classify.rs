//! Failure classification.
//!
//! Every transport failure maps to exactly one [`FailureKind`]. Rules, in priority order:
//!
//! 1. no response received: `NetworkUnreachable` (or `Timeout` when the transport itself gave up
//!    waiting on a deadline)
//! 2. `401`: `AuthExpired`
//! 3. `429`: `RateLimited`
//! 4. `408`: `Timeout`, `409`: `Conflict`
//! 5. any other `4xx`: `ClientRejected`
//! 6. `5xx` and above: `ServerError`
//!
//! Anything else (a transport reporting a 1xx-3xx status as a failure) is `ClientRejected`, the
//! most conservative kind: it is never retried.

use crate::envelope::ErrorEnvelope;
use std::fmt;
use std::time::Duration;

/// Generic message shown when neither the server nor the caller supplied one.
pub const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// 4xx not covered by a more specific kind; the request is malformed or refused.
    ClientRejected,
    /// 409.
    Conflict,
    /// 429.
    RateLimited,
    /// 408 or a transport deadline.
    Timeout,
    /// 5xx.
    ServerError,
    /// The request never reached the server.
    NetworkUnreachable,
    /// 401; owned by the token refresh coordinator.
    AuthExpired,
}

impl FailureKind {
    /// Kinds the retry engine may retry at all. Budgets still apply.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited
                | FailureKind::Timeout
                | FailureKind::ServerError
                | FailureKind::NetworkUnreachable
        )
    }

    fn fallback_message(self) -> &'static str {
        match self {
            FailureKind::ClientRejected => "The request could not be processed.",
            FailureKind::Conflict => "This item was changed by someone else. Reload and try again.",
            FailureKind::RateLimited => "Too many requests. Please wait a moment and try again.",
            FailureKind::Timeout => "The server took too long to respond. Please try again.",
            FailureKind::ServerError => GENERIC_MESSAGE,
            FailureKind::NetworkUnreachable => {
                "Unable to reach the server. Check your connection and try again."
            }
            FailureKind::AuthExpired => "Your session has expired. Please sign in again.",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ClientRejected => "client rejected",
            FailureKind::Conflict => "conflict",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Timeout => "timeout",
            FailureKind::ServerError => "server error",
            FailureKind::NetworkUnreachable => "network unreachable",
            FailureKind::AuthExpired => "auth expired",
        };
        f.write_str(name)
    }
}

/// Response details attached to a failure that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureResponse {
    pub status: u16,
    /// Parsed `Retry-After` hint.
    pub retry_after: Option<Duration>,
    pub envelope: Option<ErrorEnvelope>,
}

/// A failed transport call, as handed to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    response: Option<FailureResponse>,
    deadline_exceeded: bool,
    message: String,
}

impl TransportFailure {
    /// The server answered with a non-success status.
    pub fn status(status: u16) -> Self {
        Self {
            response: Some(FailureResponse { status, retry_after: None, envelope: None }),
            deadline_exceeded: false,
            message: format!("request failed with status {}", status),
        }
    }

    /// Build from a status and a response body, decoding the error envelope when present.
    pub fn from_response(status: u16, body: &serde_json::Value) -> Self {
        let mut failure = Self::status(status);
        if let Some(envelope) = ErrorEnvelope::from_body(body) {
            failure = failure.with_envelope(envelope);
        }
        failure
    }

    /// The request never produced a response (DNS, refused connection, offline).
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self { response: None, deadline_exceeded: false, message: message.into() }
    }

    /// The transport gave up waiting for a response.
    pub fn deadline(message: impl Into<String>) -> Self {
        Self { response: None, deadline_exceeded: true, message: message.into() }
    }

    /// Attach a `Retry-After` hint. No-op for failures without a response.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        if let Some(resp) = self.response.as_mut() {
            resp.retry_after = Some(delay);
        }
        self
    }

    /// Attach a decoded error envelope. No-op for failures without a response.
    pub fn with_envelope(mut self, envelope: ErrorEnvelope) -> Self {
        if let Some(resp) = self.response.as_mut() {
            resp.envelope = Some(envelope);
        }
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn response(&self) -> Option<&FailureResponse> {
        self.response.as_ref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.response.as_ref().and_then(|r| r.retry_after)
    }

    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        self.response.as_ref().and_then(|r| r.envelope.as_ref())
    }

    /// Diagnostic message (not meant for end users).
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> FailureKind {
        classify(self)
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportFailure {}

/// Classify a failure. Total over all inputs.
pub fn classify(failure: &TransportFailure) -> FailureKind {
    let Some(response) = failure.response() else {
        return if failure.deadline_exceeded {
            FailureKind::Timeout
        } else {
            FailureKind::NetworkUnreachable
        };
    };
    match response.status {
        401 => FailureKind::AuthExpired,
        429 => FailureKind::RateLimited,
        408 => FailureKind::Timeout,
        409 => FailureKind::Conflict,
        400..=499 => FailureKind::ClientRejected,
        500.. => FailureKind::ServerError,
        _ => FailureKind::ClientRejected,
    }
}

/// Message suitable for end users: the server's own message when it sent one, otherwise a
/// per-kind fallback.
pub fn user_message(failure: &TransportFailure) -> String {
    failure
        .envelope()
        .and_then(ErrorEnvelope::server_message)
        .map(str::to_owned)
        .unwrap_or_else(|| classify(failure).fallback_message().to_owned())
}

/// Parse a `Retry-After` header value given in delta-seconds.
///
/// HTTP-date values are not supported and yield `None`, which makes the retry engine fall back
/// to its own backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_401_maps_to_auth_expired() {
        for status in 100u16..=599 {
            let kind = classify(&TransportFailure::status(status));
            assert_eq!(kind == FailureKind::AuthExpired, status == 401, "status {}", status);
        }
        assert_ne!(classify(&TransportFailure::unreachable("offline")), FailureKind::AuthExpired);
    }

    #[test]
    fn priority_rules() {
        assert_eq!(classify(&TransportFailure::unreachable("dns")), FailureKind::NetworkUnreachable);
        assert_eq!(classify(&TransportFailure::deadline("slow")), FailureKind::Timeout);
        assert_eq!(classify(&TransportFailure::status(429)), FailureKind::RateLimited);
        assert_eq!(classify(&TransportFailure::status(408)), FailureKind::Timeout);
        assert_eq!(classify(&TransportFailure::status(409)), FailureKind::Conflict);
        assert_eq!(classify(&TransportFailure::status(400)), FailureKind::ClientRejected);
        assert_eq!(classify(&TransportFailure::status(422)), FailureKind::ClientRejected);
        assert_eq!(classify(&TransportFailure::status(500)), FailureKind::ServerError);
        assert_eq!(classify(&TransportFailure::status(503)), FailureKind::ServerError);
        assert_eq!(classify(&TransportFailure::status(302)), FailureKind::ClientRejected);
    }

    #[test]
    fn retry_after_is_kept_on_response_failures_only() {
        let f = TransportFailure::status(429).with_retry_after(Duration::from_secs(2));
        assert_eq!(f.retry_after(), Some(Duration::from_secs(2)));
        let f = TransportFailure::unreachable("x").with_retry_after(Duration::from_secs(2));
        assert_eq!(f.retry_after(), None);
    }

    #[test]
    fn user_message_prefers_server_text() {
        let body = serde_json::json!({ "status": 409, "userMessage": "Name already taken" });
        let f = TransportFailure::from_response(409, &body);
        assert_eq!(user_message(&f), "Name already taken");

        let bare = TransportFailure::status(503);
        assert_eq!(user_message(&bare), GENERIC_MESSAGE);
    }

    #[test]
    fn parses_delta_seconds_only() {
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}

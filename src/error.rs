//! Error type surfaced to callers of the access layer.
use crate::classify::{self, FailureKind, TransportFailure, GENERIC_MESSAGE};
use std::time::Duration;

/// Message shown when credential renewal failed for good.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// Unified error for requests issued through the access layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// A single classified transport failure.
    #[error("{kind}: {failure}")]
    Request { kind: FailureKind, failure: TransportFailure },
    /// A retryable failure persisted through the whole retry budget.
    #[error("retry exhausted after {attempts} attempts; last error: {last}")]
    RetryExhausted { attempts: u32, last: Box<ApiError> },
    /// Credential renewal failed, or the renewed credential was rejected too.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },
    /// The request gave up waiting for an in-flight credential renewal.
    #[error("gave up after {waited:?} waiting for credential renewal")]
    RenewalTimeout { waited: Duration },
    /// The response body did not match the expected shape.
    #[error("response body could not be decoded: {0}")]
    Decode(String),
}

impl ApiError {
    /// Wrap a transport failure, classifying it.
    pub fn from_failure(failure: TransportFailure) -> Self {
        ApiError::Request { kind: classify::classify(&failure), failure }
    }

    /// Failure kind of the underlying transport failure, if there is one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ApiError::Request { kind, .. } => Some(*kind),
            ApiError::RetryExhausted { last, .. } => last.kind(),
            _ => None,
        }
    }

    /// The transport failure at the root of this error, if any.
    pub fn failure(&self) -> Option<&TransportFailure> {
        match self {
            ApiError::Request { failure, .. } => Some(failure),
            ApiError::RetryExhausted { last, .. } => last.failure(),
            _ => None,
        }
    }

    /// Terminal authentication failure: the session must end.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthenticationFailed { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, ApiError::RetryExhausted { .. })
    }

    /// Message the server supplied for end users, if any.
    pub fn server_message(&self) -> Option<&str> {
        self.failure().and_then(|f| f.envelope()).and_then(|e| e.server_message())
    }

    /// Message suitable for end users.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Request { failure, .. } => classify::user_message(failure),
            ApiError::RetryExhausted { last, .. } => last.user_message(),
            ApiError::AuthenticationFailed { .. } => SESSION_EXPIRED_MESSAGE.to_owned(),
            ApiError::RenewalTimeout { .. } => {
                "The server took too long to respond. Please try again.".to_owned()
            }
            ApiError::Decode(_) => GENERIC_MESSAGE.to_owned(),
        }
    }
}

impl From<TransportFailure> for ApiError {
    fn from(failure: TransportFailure) -> Self {
        ApiError::from_failure(failure)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorEnvelope;

    #[test]
    fn request_display_includes_kind() {
        let err = ApiError::from_failure(TransportFailure::status(503));
        let msg = err.to_string();
        assert!(msg.contains("server error"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn retry_exhausted_delegates_kind_and_message() {
        let last = ApiError::from_failure(
            TransportFailure::status(500)
                .with_envelope(ErrorEnvelope::with_status(500).with_user_message("Import failed")),
        );
        let err = ApiError::RetryExhausted { attempts: 3, last: Box::new(last) };
        assert_eq!(err.kind(), Some(FailureKind::ServerError));
        assert_eq!(err.user_message(), "Import failed");
        assert_eq!(err.server_message(), Some("Import failed"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn auth_failure_has_no_kind() {
        let err = ApiError::AuthenticationFailed { reason: "refresh token revoked".into() };
        assert!(err.is_auth_failure());
        assert_eq!(err.kind(), None);
        assert_eq!(err.user_message(), SESSION_EXPIRED_MESSAGE);
    }

    #[test]
    fn decode_errors_convert() {
        let err: ApiError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(matches!(err, ApiError::Decode(_)));
        assert_eq!(err.user_message(), GENERIC_MESSAGE);
    }
}

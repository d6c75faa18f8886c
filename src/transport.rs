//! Transport boundary.
//!
//! The access layer never talks to the network itself. It consumes a [`Transport`] that executes
//! one request with an optional credential and reports non-success statuses as
//! [`TransportFailure`]s.

use crate::classify::TransportFailure;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// HTTP method of a request. Drives idempotency for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Options,
    Put,
    Delete,
    Post,
    Patch,
}

impl Method {
    /// Safe to repeat without changing the outcome.
    pub fn is_idempotent(self) -> bool {
        !matches!(self, Method::Post | Method::Patch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path (or full URL) the request is sent to.
    pub target: String,
    pub body: Option<Value>,
    /// Overrides the method's idempotency (e.g. a POST carrying an idempotency key).
    pub idempotent: Option<bool>,
}

impl ApiRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self { method, target: target.into(), body: None, idempotent: None }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, target).with_body(body)
    }

    pub fn put(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, target).with_body(body)
    }

    pub fn patch(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, target).with_body(body)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::Delete, target)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent.unwrap_or_else(|| self.method.is_idempotent())
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

/// Access credential attached to requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
}

impl Credential {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into() }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("access_token", &"<redacted>").finish()
    }
}

/// Executes a single request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse, TransportFailure>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse, TransportFailure> {
        (**self).execute(request, credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idempotency_follows_method_unless_overridden() {
        assert!(ApiRequest::get("/schools").is_idempotent());
        assert!(ApiRequest::put("/schools/1", json!({})).is_idempotent());
        assert!(!ApiRequest::post("/schools", json!({})).is_idempotent());
        assert!(ApiRequest::post("/schools", json!({})).idempotent(true).is_idempotent());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::bearer("secret-token");
        assert!(!format!("{:?}", cred).contains("secret"));
        assert_eq!(cred.header_value(), "Bearer secret-token");
    }

    #[test]
    fn response_decodes_json() {
        let resp = ApiResponse::ok(json!({ "id": 7 }));
        #[derive(serde::Deserialize)]
        struct School {
            id: u32,
        }
        assert_eq!(resp.json::<School>().unwrap().id, 7);
    }
}

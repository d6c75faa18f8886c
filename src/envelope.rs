//! Error envelope returned by the API on non-2xx responses.
//!
//! The envelope follows the problem-details shape used by the backend:
//!
//! ```json
//! {
//!   "status": 422,
//!   "title": "Validation failed",
//!   "detail": "name must not be blank",
//!   "userMessage": "Please give the school a name.",
//!   "timestamp": "2024-05-01T12:00:00Z",
//!   "violations": { "items": [{ "name": "name", "message": "must not be blank" }] }
//! }
//! ```
//!
//! Only the fields the classifier and the failure pipeline inspect are modelled; unknown
//! fields are ignored.

use serde::{Deserialize, Serialize};

/// Decoded error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status: u16,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<Violations>,
}

/// Field-level validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violations {
    #[serde(default)]
    pub items: Vec<Violation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub name: String,
    pub message: String,
}

impl ErrorEnvelope {
    /// Envelope carrying only a status, for transports that build failures by hand.
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            kind: None,
            title: None,
            detail: None,
            user_message: None,
            timestamp: String::new(),
            violations: None,
        }
    }

    /// Best-effort decode of a response body. Bodies that are not an envelope yield `None`.
    pub fn from_body(body: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(body.clone()).ok()
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_violation(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.violations
            .get_or_insert_with(Violations::default)
            .items
            .push(Violation { name: name.into(), message: message.into() });
        self
    }

    /// The message the server intends for end users, if any.
    ///
    /// Preference: `userMessage`, then `detail`, then `title`. Blank strings are skipped.
    pub fn server_message(&self) -> Option<&str> {
        [&self.user_message, &self.detail, &self.title]
            .into_iter()
            .filter_map(|m| m.as_deref())
            .map(str::trim)
            .find(|m| !m.is_empty())
    }

    /// Field violations as `(field, message)` pairs.
    pub fn field_errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.violations
            .iter()
            .flat_map(|v| v.items.iter())
            .map(|item| (item.name.as_str(), item.message.as_str()))
    }
}

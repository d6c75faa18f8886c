use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Ordered list of JSON segments identifying a cached query, e.g. `["schools", "list", {"page": 2}]`.
///
/// Equality is deep equality of the segments. A key matches a prefix when its leading segments
/// equal the prefix's segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<Value>);

impl CacheKey {
    pub fn from_segments(segments: Vec<Value>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key extended by one segment.
    pub fn child(&self, segment: impl Into<Value>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Stable string form used as the map key.
    pub(crate) fn canonical(&self) -> String {
        Value::Array(self.0.clone()).to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<Vec<Value>> for CacheKey {
    fn from(segments: Vec<Value>) -> Self {
        Self(segments)
    }
}

impl<const N: usize> From<[&str; N]> for CacheKey {
    fn from(segments: [&str; N]) -> Self {
        Self(segments.iter().map(|s| Value::from(*s)).collect())
    }
}

impl From<&str> for CacheKey {
    fn from(segment: &str) -> Self {
        Self(vec![Value::from(segment)])
    }
}

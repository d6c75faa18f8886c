//! Freshness windows.
//!
//! An entry is fresh until `stale_after` has elapsed since its fetch and is dropped once
//! `evict_after` has elapsed (unless something still subscribes to it).

use super::key::CacheKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("stale_after ({stale:?}) must not exceed evict_after ({evict:?})")]
    StaleAfterEvict { stale: Duration, evict: Duration },
}

/// Stale/evict pair for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheWindow {
    stale_after: Duration,
    evict_after: Duration,
}

impl CacheWindow {
    pub fn new(stale_after: Duration, evict_after: Duration) -> Result<Self, WindowError> {
        if stale_after > evict_after {
            return Err(WindowError::StaleAfterEvict { stale: stale_after, evict: evict_after });
        }
        Ok(Self { stale_after, evict_after })
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn evict_after(&self) -> Duration {
        self.evict_after
    }
}

/// Named windows for common data volatility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// 2 min stale / 5 min evict.
    Short,
    /// 5 min stale / 10 min evict.
    #[default]
    Medium,
    /// 15 min stale / 30 min evict.
    Long,
    /// 60 min stale / 120 min evict.
    Hourly,
}

impl CacheTier {
    pub fn window(self) -> CacheWindow {
        let (stale, evict) = match self {
            CacheTier::Short => (2, 5),
            CacheTier::Medium => (5, 10),
            CacheTier::Long => (15, 30),
            CacheTier::Hourly => (60, 120),
        };
        CacheWindow { stale_after: MINUTE * stale, evict_after: MINUTE * evict }
    }
}

/// Default window plus per-prefix overrides. The longest matching prefix wins.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    default: CacheWindow,
    overrides: Vec<(CacheKey, CacheWindow)>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(CacheTier::default().window())
    }
}

impl CachePolicy {
    pub fn new(default: CacheWindow) -> Self {
        Self { default, overrides: Vec::new() }
    }

    pub fn with_override(mut self, prefix: CacheKey, window: CacheWindow) -> Self {
        self.overrides.retain(|(existing, _)| existing != &prefix);
        self.overrides.push((prefix, window));
        self
    }

    pub fn with_tier(self, prefix: CacheKey, tier: CacheTier) -> Self {
        self.with_override(prefix, tier.window())
    }

    pub fn default_window(&self) -> CacheWindow {
        self.default
    }

    pub fn window_for(&self, key: &CacheKey) -> CacheWindow {
        self.overrides
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, window)| *window)
            .unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_match_documented_windows() {
        assert_eq!(CacheTier::Short.window().stale_after(), Duration::from_secs(120));
        assert_eq!(CacheTier::Short.window().evict_after(), Duration::from_secs(300));
        assert_eq!(CacheTier::Hourly.window().evict_after(), Duration::from_secs(7200));
        assert_eq!(CacheTier::default(), CacheTier::Medium);
    }

    #[test]
    fn inverted_window_rejected() {
        let err = CacheWindow::new(Duration::from_secs(10), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, WindowError::StaleAfterEvict { .. }));
        assert!(CacheWindow::new(Duration::ZERO, Duration::ZERO).is_ok());
    }

    #[test]
    fn longest_prefix_wins() {
        let policy = CachePolicy::default()
            .with_tier(CacheKey::from(["schools"]), CacheTier::Long)
            .with_tier(CacheKey::from(["schools", "stats"]), CacheTier::Short);
        assert_eq!(policy.window_for(&CacheKey::from(["schools", "stats", "x"])), CacheTier::Short.window());
        assert_eq!(policy.window_for(&CacheKey::from(["schools", "list"])), CacheTier::Long.window());
        assert_eq!(policy.window_for(&CacheKey::from(["users"])), CacheTier::Medium.window());
    }

    #[test]
    fn re_adding_a_prefix_replaces_it() {
        let policy = CachePolicy::default()
            .with_tier(CacheKey::from(["schools"]), CacheTier::Long)
            .with_tier(CacheKey::from(["schools"]), CacheTier::Hourly);
        assert_eq!(policy.window_for(&CacheKey::from(["schools"])), CacheTier::Hourly.window());
    }
}

//! Rate Limit Configuration
//!
//! Per-category limits, window length and the policy for unkeyed calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::category::Category;
use super::window::DEFAULT_WINDOW_MS;

/// What to do with a check that carries no resource key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnkeyedPolicy {
    /// Allow without tracking
    #[default]
    Skip,
    /// Track all unkeyed calls of a category in one shared window
    Shared,
}

impl std::str::FromStr for UnkeyedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(UnkeyedPolicy::Skip),
            "shared" => Ok(UnkeyedPolicy::Shared),
            other => Err(format!("unknown unkeyed policy: {}", other)),
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Document reads per window, per document path
    pub document_read_limit: u32,

    /// Document writes per window, per document path
    pub document_write_limit: u32,

    /// Collection fetches per window, per collection path
    pub collection_read_limit: u32,

    /// Subscriptions per window, per path
    pub subscription_limit: u32,

    /// Rolling window length in milliseconds
    pub window_ms: u64,

    /// Handling of checks without a key
    pub unkeyed: UnkeyedPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            document_read_limit: Category::DocumentRead.default_limit(),
            document_write_limit: Category::DocumentWrite.default_limit(),
            collection_read_limit: Category::CollectionRead.default_limit(),
            subscription_limit: Category::Subscription.default_limit(),
            window_ms: DEFAULT_WINDOW_MS,
            unkeyed: UnkeyedPolicy::default(),
        }
    }
}

impl RateLimitConfig {
    /// Disable rate limiting (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Same limit for every category
    pub fn uniform(limit: u32) -> Self {
        Self {
            document_read_limit: limit,
            document_write_limit: limit,
            collection_read_limit: limit,
            subscription_limit: limit,
            ..Self::default()
        }
    }

    /// Override the limit of one category
    pub fn with_limit(mut self, category: Category, limit: u32) -> Self {
        *self.limit_mut(category) = limit;
        self
    }

    pub fn with_unkeyed(mut self, policy: UnkeyedPolicy) -> Self {
        self.unkeyed = policy;
        self
    }

    /// Maximum requests per window for a category
    pub fn limit_for(&self, category: Category) -> u32 {
        match category {
            Category::DocumentRead => self.document_read_limit,
            Category::DocumentWrite => self.document_write_limit,
            Category::CollectionRead => self.collection_read_limit,
            Category::Subscription => self.subscription_limit,
        }
    }

    fn limit_mut(&mut self, category: Category) -> &mut u32 {
        match category {
            Category::DocumentRead => &mut self.document_read_limit,
            Category::DocumentWrite => &mut self.document_write_limit,
            Category::CollectionRead => &mut self.collection_read_limit,
            Category::Subscription => &mut self.subscription_limit,
        }
    }

    /// Get window duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Apply `DOCGATE_*` environment overrides; unparsable or zero values are ignored
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("DOCGATE_RATE_LIMIT_ENABLED") {
            self.enabled = val.parse().unwrap_or(self.enabled);
        }

        for (var, category) in [
            ("DOCGATE_DOCUMENT_READ_LIMIT", Category::DocumentRead),
            ("DOCGATE_DOCUMENT_WRITE_LIMIT", Category::DocumentWrite),
            ("DOCGATE_COLLECTION_READ_LIMIT", Category::CollectionRead),
            ("DOCGATE_SUBSCRIPTION_LIMIT", Category::Subscription),
        ] {
            if let Ok(val) = std::env::var(var) {
                if let Ok(limit) = val.parse::<u32>() {
                    if limit > 0 {
                        *self.limit_mut(category) = limit;
                    }
                }
            }
        }

        if let Ok(val) = std::env::var("DOCGATE_RATE_WINDOW_MS") {
            if let Ok(window) = val.parse::<u64>() {
                if window > 0 {
                    self.window_ms = window;
                }
            }
        }

        if let Ok(val) = std::env::var("DOCGATE_UNKEYED_POLICY") {
            if let Ok(policy) = val.parse() {
                self.unkeyed = policy;
            }
        }

        self
    }

    /// Validate limits and window
    pub fn validate(&self) -> anyhow::Result<()> {
        for category in Category::ALL {
            if self.limit_for(category) == 0 {
                anyhow::bail!("Rate limit for {} must be > 0", category);
            }
        }
        if self.window_ms == 0 {
            anyhow::bail!("Rate limit window must be > 0 ms");
        }
        Ok(())
    }
}

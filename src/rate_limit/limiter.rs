//! Rate Limiter
//!
//! Sliding-window limiter keyed by (category, resource key).

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::category::Category;
use super::clock::{Clock, SystemClock};
use super::config::{RateLimitConfig, UnkeyedPolicy};
use super::window::SlidingWindow;
use crate::error::{DocError, Result};
use crate::metrics;

/// Identity of a tracked window
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize)]
pub struct WindowKey {
    pub category: Category,
    /// `None` is the shared unkeyed window of the category
    pub key: Option<String>,
}

impl WindowKey {
    pub fn new(category: Category, key: Option<&str>) -> Self {
        Self {
            category,
            key: key.map(str::to_string),
        }
    }
}

/// Usage snapshot for one window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub category: Category,
    pub key: Option<String>,
    /// Requests currently inside the window
    pub count: usize,
    pub limit: u32,
}

impl WindowStats {
    pub fn remaining(&self) -> u32 {
        (self.limit as usize).saturating_sub(self.count) as u32
    }
}

/// Per-category sliding-window rate limiter
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    clock: Arc<dyn Clock>,
    windows: Arc<Mutex<HashMap<WindowKey, SlidingWindow>>>,
}

impl RateLimiter {
    /// Create a limiter driven by the wall clock
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit time source
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a limiter that allows everything
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<WindowKey, SlidingWindow>> {
        // A panic mid-update can at worst leave one extra timestamp behind
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an attempt and decide whether it may proceed.
    ///
    /// The attempt is appended to its window before the window is pruned and
    /// counted, so rejected attempts keep consuming capacity. Fails with
    /// [`DocError::RateLimitExceeded`] once the pruned count exceeds the
    /// category limit.
    pub fn check_and_record(&self, category: Category, key: Option<&str>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        if key.is_none() && self.config.unkeyed == UnkeyedPolicy::Skip {
            debug!(category = %category, "Unkeyed request, not tracked");
            metrics::record_check(category, true);
            return Ok(());
        }

        let now = self.clock.now_millis();
        let limit = self.config.limit_for(category);
        let count = self
            .windows()
            .entry(WindowKey::new(category, key))
            .or_default()
            .record(now, self.config.window_ms);

        if count > limit as usize {
            warn!(
                category = %category,
                key = key.unwrap_or("<unkeyed>"),
                count,
                limit,
                "Rate limit exceeded"
            );
            metrics::record_check(category, false);
            return Err(DocError::rate_limited(category, key));
        }

        debug!(
            category = %category,
            key = key.unwrap_or("<unkeyed>"),
            count,
            limit,
            "Rate limit check passed"
        );
        metrics::record_check(category, true);
        Ok(())
    }

    /// Requests currently counted against a window
    pub fn usage(&self, category: Category, key: Option<&str>) -> usize {
        let now = self.clock.now_millis();
        self.windows()
            .get(&WindowKey::new(category, key))
            .map(|w| w.count_at(now, self.config.window_ms))
            .unwrap_or(0)
    }

    /// Usage of every tracked window, sorted by category then key
    pub fn stats(&self) -> Vec<WindowStats> {
        let now = self.clock.now_millis();
        let windows = self.windows();
        let mut stats: Vec<WindowStats> = windows
            .iter()
            .map(|(k, w)| WindowStats {
                category: k.category,
                key: k.key.clone(),
                count: w.count_at(now, self.config.window_ms),
                limit: self.config.limit_for(k.category),
            })
            .collect();
        stats.sort_by(|a, b| (a.category, &a.key).cmp(&(b.category, &b.key)));
        stats
    }

    /// Number of windows created so far
    pub fn tracked_windows(&self) -> usize {
        self.windows().len()
    }

    /// Forget all recorded history
    pub fn reset(&self) {
        self.windows().clear();
    }
}

//! Rate Limiting Module
//!
//! Per-category, per-resource request guard for outbound store operations.
//!
//! # Features
//!
//! - Strict rolling window (default one minute) over request timestamps
//! - Independent windows per (category, key)
//! - Configurable limits and unkeyed-call policy
//! - Injectable clock for deterministic tests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      RateLimiter                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  check_and_record(category, key?)                         │
//! │      push now ─▶ prune (now - ts >= window) ─▶ compare    │
//! ├──────────────────────────────────────────────────────────┤
//! │  Mutex<HashMap<WindowKey, SlidingWindow>>                 │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod category;
pub mod clock;
pub mod config;
pub mod limiter;
pub mod window;

#[cfg(test)]
mod proptests;

pub use category::Category;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimitConfig, UnkeyedPolicy};
pub use limiter::{RateLimiter, WindowKey, WindowStats};
pub use window::{SlidingWindow, DEFAULT_WINDOW_MS};

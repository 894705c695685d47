//! docgate Library
//!
//! A rate-limited façade over a document database. Every call made through
//! [`DocumentService`] is classified (document read, document write,
//! collection read, subscription) and checked against a per-category
//! sliding-window limiter before it reaches the backing store.
//!
//! ```ignore
//! use docgate::{DocumentService, RateLimiter, RateLimitConfig};
//! use docgate::store::MemoryStore;
//!
//! let service = DocumentService::new(MemoryStore::new(), RateLimiter::new(RateLimitConfig::default()));
//! let doc = service.get_document("users/42").await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod service;
pub mod store;

pub use error::{DocError, Result};
pub use rate_limit::{Category, RateLimitConfig, RateLimiter};
pub use service::DocumentService;

//! Error Types
//!
//! Every failure a [`DocumentService`](crate::service::DocumentService) call can
//! surface. Rate-limit rejections are produced locally; everything else comes
//! from the backing document store and is passed through unchanged.

use crate::rate_limit::Category;

/// Error types for document operations
#[derive(Debug, thiserror::Error)]
pub enum DocError {
    /// Rate limit exceeded for a category (and key, when one was tracked)
    #[error("Rate limit exceeded for {category}{}. Please try again later.", key_suffix(.key))]
    RateLimitExceeded {
        category: Category,
        key: Option<String>,
    },

    /// Document or collection does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed document or collection path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The store rejected the request payload or query
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store refused access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Network or HTTP failure talking to the store
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store answered with something we could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(": {}", key),
        None => String::new(),
    }
}

impl DocError {
    /// Build a rate-limit rejection
    pub fn rate_limited(category: Category, key: Option<&str>) -> Self {
        DocError::RateLimitExceeded {
            category,
            key: key.map(str::to_string),
        }
    }

    /// Whether this error was raised by the local rate limiter
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DocError::RateLimitExceeded { .. })
    }
}

impl From<reqwest::Error> for DocError {
    fn from(err: reqwest::Error) -> Self {
        DocError::Transport(err.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DocError>;

//! Operation Categories
//!
//! Every guarded operation is classified into one of four categories, each
//! with its own per-minute budget.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Types of operations that can be rate-limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Single document reads
    DocumentRead,
    /// Document writes (set, update, delete, add, batch creation)
    DocumentWrite,
    /// Collection fetches and queries
    CollectionRead,
    /// Snapshot subscriptions on documents or collections
    Subscription,
}

impl Category {
    /// All categories, in a stable order
    pub const ALL: [Category; 4] = [
        Category::DocumentRead,
        Category::DocumentWrite,
        Category::CollectionRead,
        Category::Subscription,
    ];

    /// Get the default requests-per-minute limit for this category
    pub fn default_limit(&self) -> u32 {
        match self {
            Category::DocumentRead => 100,
            Category::DocumentWrite => 30,
            Category::CollectionRead => 20,
            Category::Subscription => 30,
        }
    }

    /// Stable label used in logs, metrics and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::DocumentRead => "document-read",
            Category::DocumentWrite => "document-write",
            Category::CollectionRead => "collection-read",
            Category::Subscription => "subscription",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_defaults() {
        assert_eq!(Category::DocumentRead.default_limit(), 100);
        assert_eq!(Category::DocumentWrite.default_limit(), 30);
        assert_eq!(Category::CollectionRead.default_limit(), 20);
        assert_eq!(Category::Subscription.default_limit(), 30);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("document-write".parse::<Category>(), Ok(Category::DocumentWrite));
        assert_eq!("Subscription".parse::<Category>(), Ok(Category::Subscription));
        assert!("bulk-write".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_matches_display() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category));
        }
    }
}

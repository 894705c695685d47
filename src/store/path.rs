//! Document and collection paths.
//!
//! Paths are slash-separated and alternate collection / document segments:
//! `users` is a collection, `users/42` a document, `users/42/posts` a
//! sub-collection.

use std::fmt;

use crate::error::{DocError, Result};

fn segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(DocError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| !is_valid_segment(s)) {
        return Err(DocError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

// `.`, `..` and `__name__` style ids are reserved by the database
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.trim() == segment
        && segment != "."
        && segment != ".."
        && !(segment.len() >= 4 && segment.starts_with("__") && segment.ends_with("__"))
}

/// Path to a single document (even number of segments)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn parse(path: &str) -> Result<Self> {
        if segments(path)?.len() % 2 != 0 {
            return Err(DocError::InvalidPath(path.to_string()));
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection that holds this document
    pub fn parent(&self) -> CollectionPath {
        let (parent, _) = self.0.rsplit_once('/').unwrap_or(("", &self.0));
        CollectionPath(parent.to_string())
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path to a collection (odd number of segments)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn parse(path: &str) -> Result<Self> {
        if segments(path)?.len() % 2 != 1 {
            return Err(DocError::InvalidPath(path.to_string()));
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection id (last segment)
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Document this collection hangs off, `None` for root collections
    pub fn parent(&self) -> Option<DocumentPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocumentPath(parent.to_string()))
    }

    /// Child document with the given id
    pub fn doc(&self, id: &str) -> Result<DocumentPath> {
        DocumentPath::parse(&format!("{}/{}", self.0, id))
    }

    /// Whether `doc` is a direct child of this collection
    pub fn contains(&self, doc: &str) -> bool {
        doc.strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|id| !id.is_empty() && !id.contains('/'))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_path() {
        let path = DocumentPath::parse("users/42").unwrap();
        assert_eq!(path.id(), "42");
        assert_eq!(path.parent().as_str(), "users");

        let nested = DocumentPath::parse("users/42/posts/7").unwrap();
        assert_eq!(nested.parent().as_str(), "users/42/posts");
    }

    #[test]
    fn test_collection_path() {
        let root = CollectionPath::parse("users").unwrap();
        assert!(root.parent().is_none());
        assert_eq!(root.doc("42").unwrap().as_str(), "users/42");

        let sub = CollectionPath::parse("users/42/posts").unwrap();
        assert_eq!(sub.id(), "posts");
        assert_eq!(sub.parent().unwrap().as_str(), "users/42");
    }

    #[test]
    fn test_invalid_paths() {
        for bad in ["", "/users/1", "users/1/", "users//1", "users/ 1"] {
            assert!(DocumentPath::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(DocumentPath::parse("users").is_err());
        assert!(CollectionPath::parse("users/1").is_err());
        assert!(CollectionPath::parse("users/1").unwrap_err().to_string().contains("users/1"));
    }

    #[test]
    fn test_reserved_segments_rejected() {
        for bad in ["a/../users/42", "users/./42", "users/..", "users/__id__", "__meta__/1"] {
            assert!(DocumentPath::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(CollectionPath::parse("users/../posts").is_err());
        assert!(CollectionPath::parse("users").unwrap().doc("..").is_err());

        // Only the exact reserved forms are rejected
        for ok in ["users/...", "users/__", "users/__x", "users/.hidden", "users/42#x"] {
            assert!(DocumentPath::parse(ok).is_ok(), "{ok:?} should be accepted");
        }
    }

    #[test]
    fn test_contains_direct_children_only() {
        let users = CollectionPath::parse("users").unwrap();
        assert!(users.contains("users/1"));
        assert!(!users.contains("users/1/posts/2"));
        assert!(!users.contains("users_archive/1"));
        assert!(!users.contains("users"));
    }
}

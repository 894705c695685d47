//! Document Store Layer
//!
//! This module defines the seam between the façade and the document
//! database that actually owns the data.
//!
//! - **memory**: in-process store (tests, local runs)
//! - **rest**: Firestore-compatible REST v1 client
//!
//! The store is responsible only for performing operations; rate limiting
//! and path validation happen in [`DocumentService`](crate::service::DocumentService).

pub mod memory;
pub mod path;
pub mod rest;
pub mod subscription;
pub mod types;

pub use memory::MemoryStore;
pub use path::{CollectionPath, DocumentPath};
pub use rest::{RestStore, RestStoreConfig};
pub use subscription::Subscription;
pub use types::{
    Direction, Document, FieldOp, Fields, Filter, FilterOp, ListenTarget, OrderBy, Patch, Query,
    Snapshot, SnapshotCallback, Timestamp, Write, WriteBatch, MAX_BATCH_WRITES,
};

use crate::error::Result;

/// Backend trait for document databases
///
/// All backends implement this trait, so the façade works the same over
/// an in-memory map or a remote service. Errors are reported as
/// [`DocError`](crate::error::DocError) and passed to callers unchanged.
#[allow(async_fn_in_trait)]
pub trait DocumentStore: Send + Sync {
    /// Read a document; `Ok(None)` when it does not exist
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// Create or overwrite a document. With `merge`, fields not present in
    /// `data` are kept.
    async fn set(&self, path: &DocumentPath, data: Fields, merge: bool) -> Result<()>;

    /// Apply field operations to an existing document
    ///
    /// Fails with `NotFound` when the document does not exist.
    async fn update(&self, path: &DocumentPath, patch: Patch) -> Result<()>;

    /// Delete a document; deleting a missing document succeeds
    async fn delete(&self, path: &DocumentPath) -> Result<()>;

    /// Create a document with a generated id and return the id
    async fn add(&self, collection: &CollectionPath, data: Fields) -> Result<String>;

    /// Run a query against a single collection
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Apply all writes atomically
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Start delivering snapshots of `target` to `callback`
    ///
    /// An initial snapshot is delivered as soon as it is available, then one
    /// per observed change. Must be called from within a Tokio runtime.
    fn listen(&self, target: ListenTarget, callback: SnapshotCallback) -> Result<Subscription>;
}

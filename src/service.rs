//! Rate-limited document service
//!
//! [`DocumentService`] is the public entry point. Every operation is
//! classified into a [`Category`], checked against the [`RateLimiter`] and
//! only then handed to the backing [`DocumentStore`]. A rejected check never
//! reaches the store.
//!
//! ```text
//! caller ──► DocumentService ──► RateLimiter::check_and_record
//!                  │                      │ Err(RateLimitExceeded)
//!                  │ Ok                   ▼
//!                  ▼                   caller
//!            path validation
//!                  │
//!                  ▼
//!            DocumentStore (memory | rest)
//! ```

use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{DocError, Result};
use crate::metrics;
use crate::rate_limit::{Category, RateLimiter};
use crate::store::{
    CollectionPath, Document, DocumentPath, DocumentStore, Fields, ListenTarget, Patch, Query,
    Snapshot, Subscription, WriteBatch, MAX_BATCH_WRITES,
};

/// Result ceiling applied to queries when none is configured
pub const DEFAULT_MAX_QUERY_RESULTS: usize = 100;

async fn timed<T>(operation: &'static str, call: impl Future<Output = Result<T>>) -> Result<T> {
    let start = Instant::now();
    let result = call.await;
    metrics::observe_duration(operation, start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        debug!(operation, error = %e, "Store operation failed");
    }
    result
}

/// Document database façade with per-category rate limiting
pub struct DocumentService<S> {
    store: S,
    limiter: RateLimiter,
    max_query_results: usize,
}

impl<S: DocumentStore> DocumentService<S> {
    pub fn new(store: S, limiter: RateLimiter) -> Self {
        Self {
            store,
            limiter,
            max_query_results: DEFAULT_MAX_QUERY_RESULTS,
        }
    }

    /// Override the query result ceiling
    pub fn with_max_query_results(mut self, max: usize) -> Self {
        self.max_query_results = max;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn max_query_results(&self) -> usize {
        self.max_query_results
    }

    /// Read a document, `None` if it does not exist
    pub async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        self.limiter
            .check_and_record(Category::DocumentRead, Some(path))?;
        let path = DocumentPath::parse(path)?;
        debug!(path = %path, "Getting document");
        timed("get", self.store.get(&path)).await
    }

    /// Read a document into a typed record; the document id is available
    /// to the record as an `id` field.
    pub async fn get_document_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.get_document(path)
            .await?
            .map(|doc| doc.deserialize())
            .transpose()
    }

    /// Create or overwrite a document; with `merge` only the given fields change
    pub async fn set_document(&self, path: &str, data: Fields, merge: bool) -> Result<()> {
        self.limiter
            .check_and_record(Category::DocumentWrite, Some(path))?;
        let path = DocumentPath::parse(path)?;
        debug!(path = %path, merge, "Setting document");
        timed("set", self.store.set(&path, data, merge)).await
    }

    /// Update fields of an existing document
    pub async fn update_document(&self, path: &str, patch: impl Into<Patch>) -> Result<()> {
        self.limiter
            .check_and_record(Category::DocumentWrite, Some(path))?;
        let path = DocumentPath::parse(path)?;
        let patch = patch.into();
        debug!(path = %path, fields = patch.len(), "Updating document");
        timed("update", self.store.update(&path, patch)).await
    }

    pub async fn delete_document(&self, path: &str) -> Result<()> {
        self.limiter
            .check_and_record(Category::DocumentWrite, Some(path))?;
        let path = DocumentPath::parse(path)?;
        debug!(path = %path, "Deleting document");
        timed("delete", self.store.delete(&path)).await
    }

    /// Create a document with a generated id and return the id
    pub async fn add_document(&self, collection: &str, data: Fields) -> Result<String> {
        self.limiter
            .check_and_record(Category::DocumentWrite, Some(collection))?;
        let collection = CollectionPath::parse(collection)?;
        debug!(collection = %collection, "Adding document");
        timed("add", self.store.add(&collection, data)).await
    }

    /// Watch a single document
    ///
    /// `callback` receives the current state immediately and again after
    /// every change; `None` means the document does not exist.
    pub fn subscribe_document<F>(&self, path: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(Option<Document>) + Send + Sync + 'static,
    {
        self.limiter
            .check_and_record(Category::Subscription, Some(path))?;
        let path = DocumentPath::parse(path)?;
        info!(path = %path, "Subscribing to document");
        self.store.listen(
            ListenTarget::Document(path.to_string()),
            Arc::new(move |snapshot| {
                if let Snapshot::Document(doc) = snapshot {
                    callback(doc);
                }
            }),
        )
    }

    /// Watch every document of a collection
    pub fn subscribe_collection<F>(&self, path: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(Vec<Document>) + Send + Sync + 'static,
    {
        self.limiter
            .check_and_record(Category::Subscription, Some(path))?;
        let path = CollectionPath::parse(path)?;
        info!(collection = %path, "Subscribing to collection");
        self.store.listen(
            ListenTarget::Collection(path.to_string()),
            Arc::new(move |snapshot| {
                if let Snapshot::Collection(docs) = snapshot {
                    callback(docs);
                }
            }),
        )
    }

    /// Read a collection, optionally filtered and ordered by `query`
    ///
    /// The collection of `query` is replaced by `path`.
    pub async fn fetch_collection(&self, path: &str, query: Option<Query>) -> Result<Vec<Document>> {
        self.limiter
            .check_and_record(Category::CollectionRead, Some(path))?;
        let collection = CollectionPath::parse(path)?;
        let mut query = query.unwrap_or_else(|| Query::new(path));
        query.collection = collection.to_string();
        debug!(collection = %collection, "Fetching collection");
        timed("run_query", self.store.run_query(&self.clamp(query))).await
    }

    /// Run a query; its limit is clamped to the result ceiling
    pub async fn execute_query(&self, query: Query) -> Result<Vec<Document>> {
        self.limiter
            .check_and_record(Category::CollectionRead, Some(&query.collection))?;
        CollectionPath::parse(&query.collection)?;
        debug!(collection = %query.collection, filters = query.filters.len(), "Executing query");
        timed("run_query", self.store.run_query(&self.clamp(query))).await
    }

    fn clamp(&self, mut query: Query) -> Query {
        let ceiling = self.max_query_results;
        query.limit = Some(query.limit.map_or(ceiling, |limit| limit.min(ceiling)));
        query
    }

    /// Start an empty batch of writes
    ///
    /// Counted as one unkeyed document write.
    pub fn batch(&self) -> Result<WriteBatch> {
        self.limiter.check_and_record(Category::DocumentWrite, None)?;
        Ok(WriteBatch::new())
    }

    /// Commit a batch atomically
    pub async fn commit_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.len() > MAX_BATCH_WRITES {
            return Err(DocError::InvalidArgument(format!(
                "batch has {} writes, at most {} are allowed",
                batch.len(),
                MAX_BATCH_WRITES
            )));
        }
        for write in batch.writes() {
            DocumentPath::parse(write.path())?;
        }
        debug!(writes = batch.len(), "Committing batch");
        timed("commit", self.store.commit(batch)).await
    }

    /// Copy every document of `source` into `target`, keeping document ids
    ///
    /// Returns the number of documents copied. Large collections are
    /// committed in several batches, so a failure part way through leaves
    /// the earlier batches in place.
    pub async fn copy_collection(&self, source: &str, target: &str) -> Result<usize> {
        self.limiter
            .check_and_record(Category::CollectionRead, Some(source))?;
        let source_path = CollectionPath::parse(source)?;
        let target_path = CollectionPath::parse(target)?;

        let docs = timed("run_query", self.store.run_query(&Query::new(source))).await?;
        if docs.is_empty() {
            info!(source = %source_path, "No documents to copy");
            return Ok(0);
        }

        for chunk in docs.chunks(MAX_BATCH_WRITES) {
            let mut batch = WriteBatch::new();
            for doc in chunk {
                batch.set(target_path.doc(&doc.id)?.to_string(), doc.data.clone());
            }
            timed("commit", self.store.commit(batch)).await?;
        }

        info!(
            source = %source_path,
            target = %target_path,
            count = docs.len(),
            "Copied collection"
        );
        Ok(docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{ManualClock, RateLimitConfig};
    use crate::store::{MemoryStore, Write};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Records every call that reaches the store
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        calls: AtomicUsize,
        last_query: std::sync::Mutex<Option<Query>>,
    }

    impl CountingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DocumentStore for CountingStore {
        async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
            self.hit();
            self.inner.get(path).await
        }

        async fn set(&self, path: &DocumentPath, data: Fields, merge: bool) -> Result<()> {
            self.hit();
            self.inner.set(path, data, merge).await
        }

        async fn update(&self, path: &DocumentPath, patch: Patch) -> Result<()> {
            self.hit();
            self.inner.update(path, patch).await
        }

        async fn delete(&self, path: &DocumentPath) -> Result<()> {
            self.hit();
            self.inner.delete(path).await
        }

        async fn add(&self, collection: &CollectionPath, data: Fields) -> Result<String> {
            self.hit();
            self.inner.add(collection, data).await
        }

        async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
            self.hit();
            *self.last_query.lock().unwrap() = Some(query.clone());
            self.inner.run_query(query).await
        }

        async fn commit(&self, batch: WriteBatch) -> Result<()> {
            self.hit();
            self.inner.commit(batch).await
        }

        fn listen(
            &self,
            target: ListenTarget,
            callback: crate::store::SnapshotCallback,
        ) -> Result<Subscription> {
            self.hit();
            self.inner.listen(target, callback)
        }
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn service(config: RateLimitConfig) -> (DocumentService<CountingStore>, ManualClock) {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::with_clock(config, Arc::new(clock.clone()));
        (DocumentService::new(CountingStore::default(), limiter), clock)
    }

    #[tokio::test]
    async fn test_rejected_call_never_reaches_store() {
        let (service, _clock) =
            service(RateLimitConfig::default().with_limit(Category::DocumentRead, 2));

        assert!(service.get_document("users/1").await.unwrap().is_none());
        assert!(service.get_document("users/1").await.is_ok());
        let err = service.get_document("users/1").await.unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for document-read: users/1. Please try again later."
        );
        assert_eq!(service.store().calls(), 2);
    }

    #[tokio::test]
    async fn test_write_limit_scenario() {
        let (service, clock) = service(RateLimitConfig::default());

        for t in 0..30 {
            clock.set(t);
            service
                .set_document("users/42", fields(json!({"n": t})), false)
                .await
                .unwrap();
        }
        clock.set(30);
        let err = service
            .update_document("users/42", Patch::new().set("n", 99))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DocError::RateLimitExceeded { category: Category::DocumentWrite, key: Some(ref k) } if k == "users/42"
        ));

        clock.set(60_031);
        service.delete_document("users/42").await.unwrap();
        assert_eq!(service.store().calls(), 31);
    }

    #[tokio::test]
    async fn test_invalid_path_checked_after_limiter() {
        let (service, _clock) =
            service(RateLimitConfig::default().with_limit(Category::DocumentRead, 1));

        let err = service.get_document("users").await.unwrap_err();
        assert!(matches!(err, DocError::InvalidPath(_)));
        // The malformed attempt still consumed the window
        assert!(service.get_document("users").await.unwrap_err().is_rate_limited());
        assert_eq!(service.store().calls(), 0);
    }

    #[tokio::test]
    async fn test_add_is_keyed_by_collection() {
        let (service, _clock) =
            service(RateLimitConfig::default().with_limit(Category::DocumentWrite, 1));

        let id = service.add_document("users", fields(json!({"a": 1}))).await.unwrap();
        assert!(!id.is_empty());
        assert!(service
            .add_document("users", Fields::new())
            .await
            .unwrap_err()
            .is_rate_limited());
        assert!(service.add_document("rooms", Fields::new()).await.is_ok());
        assert_eq!(service.limiter().usage(Category::DocumentWrite, Some("users")), 2);
    }

    #[tokio::test]
    async fn test_query_limit_clamped() {
        let (service, _clock) = service(RateLimitConfig::default());
        let service = service.with_max_query_results(10);

        service.execute_query(Query::new("users").limit(500)).await.unwrap();
        assert_eq!(service.store().last_query.lock().unwrap().as_ref().unwrap().limit, Some(10));

        service.execute_query(Query::new("users").limit(3)).await.unwrap();
        assert_eq!(service.store().last_query.lock().unwrap().as_ref().unwrap().limit, Some(3));

        service.fetch_collection("users", None).await.unwrap();
        assert_eq!(service.store().last_query.lock().unwrap().as_ref().unwrap().limit, Some(10));
    }

    #[tokio::test]
    async fn test_fetch_collection_uses_path() {
        let (service, _clock) = service(RateLimitConfig::default());
        service
            .set_document("users/1", fields(json!({"age": 5})), false)
            .await
            .unwrap();
        service
            .set_document("users/2", fields(json!({"age": 50})), false)
            .await
            .unwrap();

        let query = Query::new("ignored").filter("age", crate::store::FilterOp::Gt, 10);
        let docs = service.fetch_collection("users", Some(query)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "2");
    }

    #[tokio::test]
    async fn test_batch_is_unkeyed_and_skipped_by_default() {
        let (service, _clock) =
            service(RateLimitConfig::default().with_limit(Category::DocumentWrite, 1));
        for _ in 0..5 {
            assert!(service.batch().is_ok());
        }
        assert_eq!(service.limiter().tracked_windows(), 0);
    }

    #[tokio::test]
    async fn test_batch_shared_policy() {
        let config = RateLimitConfig::default()
            .with_limit(Category::DocumentWrite, 2)
            .with_unkeyed(crate::rate_limit::UnkeyedPolicy::Shared);
        let (service, _clock) = service(config);
        assert!(service.batch().is_ok());
        assert!(service.batch().is_ok());
        assert!(service.batch().unwrap_err().is_rate_limited());
    }

    #[tokio::test]
    async fn test_commit_batch_validates() {
        let (service, _clock) = service(RateLimitConfig::default());

        let mut batch = service.batch().unwrap();
        batch.set("users", Fields::new());
        assert!(matches!(
            service.commit_batch(batch).await,
            Err(DocError::InvalidPath(_))
        ));

        let mut batch = service.batch().unwrap();
        for i in 0..=MAX_BATCH_WRITES {
            batch.delete(format!("users/{}", i));
        }
        assert!(matches!(
            service.commit_batch(batch).await,
            Err(DocError::InvalidArgument(_))
        ));
        assert_eq!(service.store().calls(), 0);

        let mut batch = service.batch().unwrap();
        batch.set("users/1", fields(json!({"a": 1})));
        service.commit_batch(batch).await.unwrap();
        assert!(service.get_document("users/1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_copy_collection() {
        let (service, _clock) = service(RateLimitConfig::default());
        assert_eq!(service.copy_collection("empty", "target").await.unwrap(), 0);

        let mut batch = WriteBatch::new();
        for i in 0..3 {
            batch.set(format!("src/{}", i), fields(json!({"i": i})));
        }
        service.store().inner.commit(batch).await.unwrap();

        assert_eq!(service.copy_collection("src", "dst").await.unwrap(), 3);
        let copied = service.get_document("dst/2").await.unwrap().unwrap();
        assert_eq!(copied.data["i"], json!(2));
    }

    #[tokio::test]
    async fn test_copy_collection_in_chunks() {
        let (service, _clock) = service(RateLimitConfig::default());
        let writes: Vec<Write> = (0..MAX_BATCH_WRITES + 20)
            .map(|i| Write::Set {
                path: format!("big/{:04}", i),
                data: Fields::new(),
                merge: false,
            })
            .collect();
        for chunk in writes.chunks(MAX_BATCH_WRITES) {
            let mut batch = WriteBatch::new();
            for write in chunk {
                batch.set(write.path(), Fields::new());
            }
            service.store().inner.commit(batch).await.unwrap();
        }

        let before = service.store().calls();
        let copied = service.copy_collection("big", "big_copy").await.unwrap();
        assert_eq!(copied, MAX_BATCH_WRITES + 20);
        // One query plus two commits
        assert_eq!(service.store().calls() - before, 3);
        assert_eq!(service.store().inner.document_count(), 2 * copied);
    }

    #[tokio::test]
    async fn test_subscribe_is_rate_limited() {
        let (service, _clock) =
            service(RateLimitConfig::default().with_limit(Category::Subscription, 1));

        let sub = service.subscribe_document("users/1", |_| {}).unwrap();
        let err = service.subscribe_document("users/1", |_| {}).unwrap_err();
        assert!(err.is_rate_limited());
        assert!(service.subscribe_collection("users", |_| {}).is_ok());
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_get_document_as() {
        #[derive(serde::Deserialize)]
        struct User {
            id: String,
            name: String,
        }
        let (service, _clock) = service(RateLimitConfig::default());
        service
            .set_document("users/7", fields(json!({"name": "ada"})), false)
            .await
            .unwrap();
        let user: User = service.get_document_as("users/7").await.unwrap().unwrap();
        assert_eq!(user.id, "7");
        assert_eq!(user.name, "ada");
    }

    #[tokio::test]
    async fn test_disabled_limiter_allows_everything() {
        let (service, _clock) = service(RateLimitConfig::disabled());
        for _ in 0..200 {
            service.get_document("users/1").await.unwrap();
        }
        assert_eq!(service.limiter().tracked_windows(), 0);
    }
}

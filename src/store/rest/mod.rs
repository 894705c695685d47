//! Firestore REST Store
//!
//! Talks to the Firestore REST v1 API (or any server speaking the same
//! protocol, such as the local emulator) over HTTPS.
//!
//! # Endpoints
//!
//! - `GET {documents}/{path}`: read a document
//! - `POST {documents}/{collection}`: create with a generated id
//! - `POST {database}/documents:commit`: set, update, delete and batches
//! - `POST {documents}[/{parent}]:runQuery`: structured queries
//!
//! Every path segment is percent-encoded on its own, so a document id can
//! never change which resource a request addresses.
//!
//! There is no streaming listen channel over plain REST, so subscriptions
//! poll the target every `poll_interval` and deliver a snapshot whenever
//! the result changes.

pub mod codec;

use reqwest::{Method, RequestBuilder, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::path::{CollectionPath, DocumentPath};
use super::subscription::Subscription;
use super::types::{
    Document, Fields, ListenTarget, Patch, Query, Snapshot, SnapshotCallback, Write, WriteBatch,
    MAX_BATCH_WRITES,
};
use super::DocumentStore;
use crate::error::{DocError, Result};

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com";
pub const DEFAULT_DATABASE: &str = "(default)";

/// Connection settings for [`RestStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct RestStoreConfig {
    pub project_id: String,
    pub database: String,
    pub base_url: String,
    /// OAuth bearer token; requests are unauthenticated without one
    pub auth_token: Option<String>,
    pub timeout: Duration,
    /// How often subscriptions re-read their target
    pub poll_interval: Duration,
}

impl RestStoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: DEFAULT_DATABASE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// `projects/{project}/databases/{database}/documents`
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }

    /// URL of `path` under the documents root with `suffix` (`:commit`,
    /// `:runQuery`) appended to the last segment
    fn endpoint(&self, path: &str, suffix: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            DocError::InvalidArgument(format!("invalid base_url {}: {}", self.base_url, e))
        })?;

        let root = [
            "v1",
            "projects",
            self.project_id.as_str(),
            "databases",
            self.database.as_str(),
            "documents",
        ];
        let mut segments: Vec<String> = root.iter().map(|s| s.to_string()).collect();
        segments.extend(path.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        if let Some(last) = segments.last_mut() {
            last.push_str(suffix);
        }

        url.path_segments_mut()
            .map_err(|_| {
                DocError::InvalidArgument(format!("base_url cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(&segments);
        Ok(url)
    }
}

/// Document store backed by the Firestore REST API
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    config: Arc<RestStoreConfig>,
}

impl RestStore {
    pub fn new(config: RestStoreConfig) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            return Err(DocError::InvalidArgument(
                "project_id must be set for the REST store".to_string(),
            ));
        }
        config.endpoint("", "")?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &RestStoreConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str, suffix: &str) -> Result<RequestBuilder> {
        let builder = self.client.request(method, self.config.endpoint(path, suffix)?);
        Ok(match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn call(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!(status = %status, body = %body, "Store request failed");
            return Err(codec::status_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| DocError::InvalidResponse(format!("{}: {}", e, body)))
    }

    async fn commit_writes(&self, writes: &[Write]) -> Result<()> {
        let root = self.config.documents_root();
        let body = json!({
            "writes": writes.iter().map(|w| codec::encode_write(w, &root)).collect::<Vec<_>>(),
        });
        self.call(self.request(Method::POST, "", ":commit")?.json(&body))
            .await?;
        Ok(())
    }

    /// Read a single document
    pub async fn fetch_document(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let root = self.config.documents_root();
        match self.call(self.request(Method::GET, path.as_str(), "")?).await {
            Ok(body) => codec::decode_document(&body, &root).map(Some),
            Err(DocError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run a structured query against one collection
    pub async fn fetch_query(&self, query: &Query) -> Result<Vec<Document>> {
        let collection = CollectionPath::parse(&query.collection)?;
        let root = self.config.documents_root();
        let parent = collection
            .parent()
            .map(|doc| doc.to_string())
            .unwrap_or_default();
        let body = codec::encode_query(query, collection.id());
        let response = self
            .call(self.request(Method::POST, &parent, ":runQuery")?.json(&body))
            .await?;

        // One element per result; progress-only elements carry no document
        let rows = response.as_array().cloned().unwrap_or_default();
        rows.iter()
            .filter_map(|row| row.get("document"))
            .map(|resource| codec::decode_document(resource, &root))
            .collect()
    }

    async fn fetch_snapshot(&self, target: &ListenTarget) -> Result<Snapshot> {
        match target {
            ListenTarget::Document(path) => {
                let path = DocumentPath::parse(path)?;
                Ok(Snapshot::Document(self.fetch_document(&path).await?))
            }
            ListenTarget::Collection(path) => Ok(Snapshot::Collection(
                self.fetch_query(&Query::new(path.as_str())).await?,
            )),
        }
    }
}

impl DocumentStore for RestStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.fetch_document(path).await
    }

    async fn set(&self, path: &DocumentPath, data: Fields, merge: bool) -> Result<()> {
        self.commit_writes(&[Write::Set {
            path: path.to_string(),
            data,
            merge,
        }])
        .await
    }

    async fn update(&self, path: &DocumentPath, patch: Patch) -> Result<()> {
        let result = self
            .commit_writes(&[Write::Update {
                path: path.to_string(),
                patch,
            }])
            .await;
        // The precondition failure for a missing document is reported as 404
        match result {
            Err(DocError::NotFound(_)) => Err(DocError::NotFound(path.to_string())),
            other => other,
        }
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        self.commit_writes(&[Write::Delete {
            path: path.to_string(),
        }])
        .await
    }

    async fn add(&self, collection: &CollectionPath, data: Fields) -> Result<String> {
        let root = self.config.documents_root();
        let body = json!({ "fields": codec::encode_fields(&data) });
        let response = self
            .call(self.request(Method::POST, collection.as_str(), "")?.json(&body))
            .await?;
        Ok(codec::decode_document(&response, &root)?.id)
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        self.fetch_query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.len() > MAX_BATCH_WRITES {
            return Err(DocError::InvalidArgument(format!(
                "batch has {} writes, at most {} are allowed",
                batch.len(),
                MAX_BATCH_WRITES
            )));
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.commit_writes(batch.writes()).await
    }

    fn listen(&self, target: ListenTarget, callback: SnapshotCallback) -> Result<Subscription> {
        match &target {
            ListenTarget::Document(path) => {
                DocumentPath::parse(path)?;
            }
            ListenTarget::Collection(path) => {
                CollectionPath::parse(path)?;
            }
        }

        let store = self.clone();
        let watched = target.clone();
        let interval = self.config.poll_interval;

        Ok(Subscription::spawn(target, async move {
            let mut last: Option<Snapshot> = None;
            loop {
                match store.fetch_snapshot(&watched).await {
                    Ok(snapshot) if last.as_ref() != Some(&snapshot) => {
                        callback(snapshot.clone());
                        last = Some(snapshot);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(path = %watched.path(), error = %e, "Snapshot poll failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }))
    }
}

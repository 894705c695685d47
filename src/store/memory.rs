//! In-memory document store
//!
//! Keeps every document in a single ordered map keyed by path. Writes are
//! broadcast so subscriptions can re-evaluate their snapshot.

use rand::distr::{Alphanumeric, SampleString};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast::{self, error::RecvError};

use super::path::{CollectionPath, DocumentPath};
use super::subscription::Subscription;
use super::types::{
    get_field, Direction, Document, FieldOp, Fields, Filter, FilterOp, ListenTarget, Patch, Query,
    Snapshot, SnapshotCallback, Timestamp, Write, WriteBatch,
};
use super::DocumentStore;
use crate::error::{DocError, Result};

type DocMap = BTreeMap<String, Fields>;

const AUTO_ID_LEN: usize = 20;
const CHANGE_BUFFER: usize = 256;

/// In-process document store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    docs: Arc<RwLock<DocMap>>,
    changes: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read(docs: &RwLock<DocMap>) -> RwLockReadGuard<'_, DocMap> {
    docs.read().unwrap_or_else(|e| e.into_inner())
}

fn write(docs: &RwLock<DocMap>) -> RwLockWriteGuard<'_, DocMap> {
    docs.write().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            docs: Arc::new(RwLock::new(BTreeMap::new())),
            changes,
        }
    }

    /// Total number of stored documents across all collections
    pub fn document_count(&self) -> usize {
        read(&self.docs).len()
    }

    fn notify(&self, path: &str) {
        // No receivers just means nobody is listening
        let _ = self.changes.send(path.to_string());
    }

    fn auto_id() -> String {
        Alphanumeric.sample_string(&mut rand::rng(), AUTO_ID_LEN)
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        Ok(read(&self.docs)
            .get(path.as_str())
            .map(|data| Document::new(path.as_str(), data.clone())))
    }

    async fn set(&self, path: &DocumentPath, data: Fields, merge: bool) -> Result<()> {
        let write_op = Write::Set {
            path: path.to_string(),
            data,
            merge,
        };
        apply_write(&mut write(&self.docs), &write_op)?;
        self.notify(path.as_str());
        Ok(())
    }

    async fn update(&self, path: &DocumentPath, patch: Patch) -> Result<()> {
        let write_op = Write::Update {
            path: path.to_string(),
            patch,
        };
        apply_write(&mut write(&self.docs), &write_op)?;
        self.notify(path.as_str());
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        let write_op = Write::Delete {
            path: path.to_string(),
        };
        apply_write(&mut write(&self.docs), &write_op)?;
        self.notify(path.as_str());
        Ok(())
    }

    async fn add(&self, collection: &CollectionPath, data: Fields) -> Result<String> {
        let path = {
            let mut docs = write(&self.docs);
            let path = loop {
                let candidate = collection.doc(&Self::auto_id())?;
                if !docs.contains_key(candidate.as_str()) {
                    break candidate;
                }
            };
            docs.insert(path.to_string(), data);
            path
        };
        self.notify(path.as_str());
        Ok(path.id().to_string())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        let collection = CollectionPath::parse(&query.collection)?;
        Ok(evaluate_query(&read(&self.docs), &collection, query))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let writes = batch.into_writes();
        {
            let mut docs = write(&self.docs);
            let mut staged = docs.clone();
            for write_op in &writes {
                apply_write(&mut staged, write_op)?;
            }
            *docs = staged;
        }
        for write_op in &writes {
            self.notify(write_op.path());
        }
        Ok(())
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

        // Subscribe before the first read so no write slips between them
        let mut changes = self.changes.subscribe();
        let docs = self.docs.clone();
        let watched = target.clone();

        Ok(Subscription::spawn(target, async move {
            let mut last = snapshot_of(&docs, &watched);
            callback(last.clone());

            loop {
                match changes.recv().await {
                    Ok(path) if !affects(&watched, &path) => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let next = snapshot_of(&docs, &watched);
                        if next != last {
                            callback(next.clone());
                            last = next;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}

fn affects(target: &ListenTarget, changed: &str) -> bool {
    match target {
        ListenTarget::Document(path) => path == changed,
        ListenTarget::Collection(path) => {
            changed.rsplit_once('/').map(|(parent, _)| parent) == Some(path.as_str())
        }
    }
}

fn snapshot_of(docs: &RwLock<DocMap>, target: &ListenTarget) -> Snapshot {
    let docs = read(docs);
    match target {
        ListenTarget::Document(path) => Snapshot::Document(
            docs.get(path)
                .map(|data| Document::new(path.as_str(), data.clone())),
        ),
        ListenTarget::Collection(path) => Snapshot::Collection(
            docs.iter()
                .filter(|(doc_path, _)| {
                    doc_path.rsplit_once('/').map(|(parent, _)| parent) == Some(path.as_str())
                })
                .map(|(doc_path, data)| Document::new(doc_path.as_str(), data.clone()))
                .collect(),
        ),
    }
}

fn apply_write(docs: &mut DocMap, write_op: &Write) -> Result<()> {
    match write_op {
        Write::Set { path, data, merge } => {
            DocumentPath::parse(path)?;
            if *merge {
                if let Some(existing) = docs.get_mut(path) {
                    deep_merge(existing, data.clone());
                    return Ok(());
                }
            }
            docs.insert(path.clone(), data.clone());
        }
        Write::Update { path, patch } => {
            DocumentPath::parse(path)?;
            let fields = docs
                .get_mut(path)
                .ok_or_else(|| DocError::NotFound(path.clone()))?;
            apply_patch(fields, patch);
        }
        Write::Delete { path } => {
            DocumentPath::parse(path)?;
            docs.remove(path);
        }
    }
    Ok(())
}

// An empty incoming map is a leaf and replaces what was there
fn deep_merge(target: &mut Fields, source: Fields) {
    for (key, value) in source {
        match value {
            Value::Object(incoming)
                if !incoming.is_empty() && target.get(&key).is_some_and(Value::is_object) =>
            {
                if let Some(Value::Object(existing)) = target.get_mut(&key) {
                    deep_merge(existing, incoming);
                }
            }
            value => {
                target.insert(key, value);
            }
        }
    }
}

/// Apply field operations in order
pub(crate) fn apply_patch(fields: &mut Fields, patch: &Patch) {
    for (field, op) in patch.ops() {
        match op {
            FieldOp::Delete => remove_field(fields, field),
            FieldOp::Set(value) => *field_slot(fields, field) = value.clone(),
            FieldOp::ServerTimestamp => *field_slot(fields, field) = Timestamp::now().to_value(),
            FieldOp::ArrayUnion(values) => {
                let slot = field_slot(fields, field);
                let mut items = match slot.take() {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                for value in values {
                    if !items.iter().any(|item| values_equal(item, value)) {
                        items.push(value.clone());
                    }
                }
                *slot = Value::Array(items);
            }
            FieldOp::ArrayRemove(values) => {
                let slot = field_slot(fields, field);
                let mut items = match slot.take() {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                items.retain(|item| !values.iter().any(|value| values_equal(item, value)));
                *slot = Value::Array(items);
            }
        }
    }
}

// Walks a dotted path, creating (or replacing non-map) intermediates
fn field_slot<'a>(fields: &'a mut Fields, path: &str) -> &'a mut Value {
    let mut parts = path.split('.');
    let first = parts.next().unwrap_or(path);
    let mut current = fields.entry(first.to_string()).or_insert(Value::Null);
    for part in parts {
        if !current.is_object() {
            *current = Value::Object(Fields::new());
        }
        let Value::Object(map) = current else {
            unreachable!("slot was just replaced with an object")
        };
        current = map.entry(part.to_string()).or_insert(Value::Null);
    }
    current
}

fn remove_field(fields: &mut Fields, path: &str) {
    let Some((parent, leaf)) = path.rsplit_once('.') else {
        fields.remove(path);
        return;
    };
    let mut parts = parent.split('.');
    let Some(mut current) = parts.next().and_then(|first| fields.get_mut(first)) else {
        return;
    };
    for part in parts {
        match current.as_object_mut().and_then(|map| map.get_mut(part)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(leaf);
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by type first, then by value
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_values(va, vb)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b).is_eq()
}

fn matches_filter(data: &Fields, filter: &Filter) -> bool {
    let Some(field) = get_field(data, &filter.field) else {
        return false;
    };
    let value = &filter.value;
    let ordered = |want: fn(Ordering) -> bool| {
        type_rank(field) == type_rank(value) && want(compare_values(field, value))
    };

    match filter.op {
        FilterOp::Eq => values_equal(field, value),
        FilterOp::Ne => !values_equal(field, value),
        FilterOp::Lt => ordered(Ordering::is_lt),
        FilterOp::Le => ordered(Ordering::is_le),
        FilterOp::Gt => ordered(Ordering::is_gt),
        FilterOp::Ge => ordered(Ordering::is_ge),
        FilterOp::ArrayContains => field
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(item, value))),
        FilterOp::ArrayContainsAny => match (field.as_array(), value.as_array()) {
            (Some(items), Some(wanted)) => items
                .iter()
                .any(|item| wanted.iter().any(|w| values_equal(item, w))),
            _ => false,
        },
        FilterOp::In => value
            .as_array()
            .is_some_and(|wanted| wanted.iter().any(|w| values_equal(field, w))),
        FilterOp::NotIn => value
            .as_array()
            .is_some_and(|wanted| !wanted.iter().any(|w| values_equal(field, w))),
    }
}

fn evaluate_query(docs: &DocMap, collection: &CollectionPath, query: &Query) -> Vec<Document> {
    let mut results: Vec<Document> = docs
        .iter()
        .filter(|(path, _)| collection.contains(path))
        .filter(|(_, data)| query.filters.iter().all(|f| matches_filter(data, f)))
        .filter(|(_, data)| {
            query
                .order_by
                .iter()
                .all(|order| get_field(data, &order.field).is_some())
        })
        .map(|(path, data)| Document::new(path.as_str(), data.clone()))
        .collect();

    if !query.order_by.is_empty() {
        results.sort_by(|a, b| {
            query
                .order_by
                .iter()
                .map(|order| {
                    let ord = match (a.get(&order.field), b.get(&order.field)) {
                        (Some(x), Some(y)) => compare_values(x, y),
                        _ => Ordering::Equal,
                    };
                    match order.direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }

    results
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect()
}

//! Document, patch, query and batch types shared by every backend.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Result;

/// Top-level fields of a document
pub type Fields = serde_json::Map<String, Value>;

/// Maximum number of writes the store accepts in one commit
pub const MAX_BATCH_WRITES: usize = 500;

/// A document snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Last path segment
    pub id: String,
    /// Full slash-separated path
    pub path: String,
    pub data: Fields,
}

impl Document {
    pub fn new(path: impl Into<String>, data: Fields) -> Self {
        let path = path.into();
        let id = path.rsplit('/').next().unwrap_or_default().to_string();
        Self { id, path, data }
    }

    /// Look up a dotted field path (`address.city`)
    pub fn get(&self, field: &str) -> Option<&Value> {
        get_field(&self.data, field)
    }

    /// Data with the document id merged in; a stored `id` field wins
    pub fn with_id(&self) -> Value {
        let mut map = Fields::new();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        map.extend(self.data.clone());
        Value::Object(map)
    }

    /// Deserialize [`Document::with_id`] into a typed record
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.with_id())?)
    }
}

/// Resolve a dotted field path inside a field map
pub fn get_field<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Point in time, rendered as an RFC 3339 string in document data
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.0.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        ts.to_value()
    }
}

/// Operation applied to a single field by an update
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Delete,
    /// Store-side time of the write
    ServerTimestamp,
    /// Append elements not already present
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of the elements
    ArrayRemove(Vec<Value>),
}

impl FieldOp {
    /// Whether the store computes the value (as opposed to a plain set/delete)
    pub fn is_transform(&self) -> bool {
        matches!(
            self,
            FieldOp::ServerTimestamp | FieldOp::ArrayUnion(_) | FieldOp::ArrayRemove(_)
        )
    }
}

/// Ordered list of field operations; field paths are dot-separated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<(String, FieldOp)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, field: impl Into<String>, op: FieldOp) -> Self {
        self.ops.push((field.into(), op));
        self
    }

    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(field, FieldOp::Set(value.into()))
    }

    pub fn delete(self, field: impl Into<String>) -> Self {
        self.op(field, FieldOp::Delete)
    }

    pub fn server_timestamp(self, field: impl Into<String>) -> Self {
        self.op(field, FieldOp::ServerTimestamp)
    }

    pub fn array_union(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.op(field, FieldOp::ArrayUnion(values))
    }

    pub fn array_remove(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.op(field, FieldOp::ArrayRemove(values))
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

impl From<Fields> for Patch {
    fn from(fields: Fields) -> Self {
        Self {
            ops: fields
                .into_iter()
                .map(|(k, v)| (k, FieldOp::Set(v)))
                .collect(),
        }
    }
}

/// Comparison used in a query filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "==" => FilterOp::Eq,
            "!=" => FilterOp::Ne,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            "array-contains" => FilterOp::ArrayContains,
            "array-contains-any" => FilterOp::ArrayContainsAny,
            "in" => FilterOp::In,
            "not-in" => FilterOp::NotIn,
            other => return Err(format!("unknown filter operator: {}", other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Filtered, ordered and paged read of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// One write inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Set {
        path: String,
        data: Fields,
        merge: bool,
    },
    Update {
        path: String,
        patch: Patch,
    },
    Delete {
        path: String,
    },
}

impl Write {
    pub fn path(&self) -> &str {
        match self {
            Write::Set { path, .. } | Write::Update { path, .. } | Write::Delete { path } => path,
        }
    }
}

/// Group of writes committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, data: Fields) -> &mut Self {
        self.writes.push(Write::Set {
            path: path.into(),
            data,
            merge: false,
        });
        self
    }

    pub fn update(&mut self, path: impl Into<String>, patch: Patch) -> &mut Self {
        self.writes.push(Write::Update {
            path: path.into(),
            patch,
        });
        self
    }

    pub fn delete(&mut self, path: impl Into<String>) -> &mut Self {
        self.writes.push(Write::Delete { path: path.into() });
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// What a subscription watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTarget {
    Document(String),
    Collection(String),
}

impl ListenTarget {
    pub fn path(&self) -> &str {
        match self {
            ListenTarget::Document(path) | ListenTarget::Collection(path) => path,
        }
    }
}

/// State delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Document(Option<Document>),
    Collection(Vec<Document>),
}

pub type SnapshotCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

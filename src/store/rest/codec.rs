//! Conversion between plain JSON documents and the typed value encoding
//! used by the Firestore REST v1 API.

use reqwest::StatusCode;
use serde_json::{json, Map, Number, Value};

use crate::error::{DocError, Result};
use crate::store::memory::apply_patch;
use crate::store::types::{
    Direction, Document, FieldOp, Fields, Filter, FilterOp, Patch, Query, Write,
};

/// Encode a JSON value as a typed REST value
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_f64() => json!({ "doubleValue": n }),
        Value::Number(n) => json!({ "integerValue": n.to_string() }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

/// Decode a typed REST value back into plain JSON
///
/// Timestamps, references and bytes come back as strings; geo points as
/// `{latitude, longitude}` objects.
pub fn decode_value(value: &Value) -> Result<Value> {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Err(DocError::InvalidResponse(format!("untyped value: {}", value)));
    };

    Ok(match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or_default()),
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| DocError::InvalidResponse(format!("bad integer: {}", s)))?,
            other => other.clone(),
        },
        "doubleValue" => match inner {
            Value::Number(_) => inner.clone(),
            // NaN and infinities arrive as strings and have no JSON form
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(decode_value).collect::<Result<Vec<_>>>())
                .transpose()?
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(decode_fields(inner.get("fields"))?),
        other => {
            return Err(DocError::InvalidResponse(format!(
                "unsupported value type: {}",
                other
            )))
        }
    })
}

pub fn decode_fields(fields: Option<&Value>) -> Result<Fields> {
    let Some(fields) = fields else {
        return Ok(Fields::new());
    };
    let map = fields
        .as_object()
        .ok_or_else(|| DocError::InvalidResponse("fields is not an object".to_string()))?;
    map.iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
        .collect()
}

/// Decode a REST document resource; `documents_root` is the
/// `projects/{p}/databases/{d}/documents` prefix of its name.
pub fn decode_document(resource: &Value, documents_root: &str) -> Result<Document> {
    let name = resource
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| DocError::InvalidResponse("document without name".to_string()))?;
    let path = name
        .strip_prefix(documents_root)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| DocError::InvalidResponse(format!("unexpected document name: {}", name)))?;
    Ok(Document::new(path, decode_fields(resource.get("fields"))?))
}

fn is_simple_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render one field name, backtick-quoted when it is not a plain identifier
pub fn quote_segment(segment: &str) -> String {
    if is_simple_segment(segment) {
        segment.to_string()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Render a dotted field path, backtick-quoting segments that need it
pub fn quote_field_path(path: &str) -> String {
    path.split('.')
        .map(quote_segment)
        .collect::<Vec<_>>()
        .join(".")
}

/// Field paths of every leaf in `fields`, used as a merge mask
///
/// Map keys are field names, so a key containing `.` is one quoted segment.
pub fn leaf_paths(fields: &Fields) -> Vec<String> {
    fn walk(fields: &Fields, prefix: &str, out: &mut Vec<String>) {
        for (key, value) in fields {
            let path = if prefix.is_empty() {
                quote_segment(key)
            } else {
                format!("{}.{}", prefix, quote_segment(key))
            };
            match value {
                Value::Object(map) if !map.is_empty() => walk(map, &path, out),
                _ => out.push(path),
            }
        }
    }

    let mut out = Vec::new();
    walk(fields, "", &mut out);
    out
}

fn filter_op_name(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "EQUAL",
        FilterOp::Ne => "NOT_EQUAL",
        FilterOp::Lt => "LESS_THAN",
        FilterOp::Le => "LESS_THAN_OR_EQUAL",
        FilterOp::Gt => "GREATER_THAN",
        FilterOp::Ge => "GREATER_THAN_OR_EQUAL",
        FilterOp::ArrayContains => "ARRAY_CONTAINS",
        FilterOp::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
        FilterOp::In => "IN",
        FilterOp::NotIn => "NOT_IN",
    }
}

fn encode_filter(filter: &Filter) -> Value {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": quote_field_path(&filter.field) },
            "op": filter_op_name(filter.op),
            "value": encode_value(&filter.value),
        }
    })
}

/// Body for a `:runQuery` request over the collection `collection_id`
pub fn encode_query(query: &Query, collection_id: &str) -> Value {
    let mut structured = Map::new();
    structured.insert("from".into(), json!([{ "collectionId": collection_id }]));

    match query.filters.as_slice() {
        [] => {}
        [single] => {
            structured.insert("where".into(), encode_filter(single));
        }
        many => {
            structured.insert(
                "where".into(),
                json!({
                    "compositeFilter": {
                        "op": "AND",
                        "filters": many.iter().map(encode_filter).collect::<Vec<_>>(),
                    }
                }),
            );
        }
    }

    if !query.order_by.is_empty() {
        let order: Vec<Value> = query
            .order_by
            .iter()
            .map(|o| {
                json!({
                    "field": { "fieldPath": quote_field_path(&o.field) },
                    "direction": match o.direction {
                        Direction::Ascending => "ASCENDING",
                        Direction::Descending => "DESCENDING",
                    },
                })
            })
            .collect();
        structured.insert("orderBy".into(), Value::Array(order));
    }
    if let Some(offset) = query.offset {
        structured.insert("offset".into(), json!(offset));
    }
    if let Some(limit) = query.limit {
        structured.insert("limit".into(), json!(limit));
    }

    json!({ "structuredQuery": structured })
}

fn encode_transform(field: &str, op: &FieldOp) -> Option<Value> {
    let field_path = quote_field_path(field);
    let values = |items: &[Value]| json!({ "values": items.iter().map(encode_value).collect::<Vec<_>>() });
    match op {
        FieldOp::ServerTimestamp => {
            Some(json!({ "fieldPath": field_path, "setToServerValue": "REQUEST_TIME" }))
        }
        FieldOp::ArrayUnion(items) => {
            Some(json!({ "fieldPath": field_path, "appendMissingElements": values(items) }))
        }
        FieldOp::ArrayRemove(items) => {
            Some(json!({ "fieldPath": field_path, "removeAllFromArray": values(items) }))
        }
        FieldOp::Set(_) | FieldOp::Delete => None,
    }
}

/// Encode one write for a `:commit` request; `documents_root` is the
/// `projects/{p}/databases/{d}/documents` resource name.
pub fn encode_write(write: &Write, documents_root: &str) -> Value {
    let name = format!("{}/{}", documents_root, write.path());
    match write {
        Write::Set { data, merge, .. } => {
            let mut body = json!({ "update": { "name": name, "fields": encode_fields(data) } });
            if *merge {
                body["updateMask"] = json!({ "fieldPaths": leaf_paths(data) });
            }
            body
        }
        Write::Update { patch, .. } => {
            let mut fields = Fields::new();
            let sets = patch
                .ops()
                .iter()
                .filter(|(_, op)| matches!(op, FieldOp::Set(_)))
                .fold(Patch::new(), |acc, (field, op)| acc.op(field.clone(), op.clone()));
            apply_patch(&mut fields, &sets);

            let mask: Vec<String> = patch
                .ops()
                .iter()
                .filter(|(_, op)| !op.is_transform())
                .map(|(field, _)| quote_field_path(field))
                .collect();
            let transforms: Vec<Value> = patch
                .ops()
                .iter()
                .filter_map(|(field, op)| encode_transform(field, op))
                .collect();

            let mut body = json!({
                "update": { "name": name, "fields": encode_fields(&fields) },
                "updateMask": { "fieldPaths": mask },
                "currentDocument": { "exists": true },
            });
            if !transforms.is_empty() {
                body["updateTransforms"] = Value::Array(transforms);
            }
            body
        }
        Write::Delete { .. } => json!({ "delete": name }),
    }
}

/// Map a failed HTTP response onto a [`DocError`]
pub fn status_error(status: StatusCode, body: &str) -> DocError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::BAD_REQUEST => DocError::InvalidArgument(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DocError::PermissionDenied(message),
        StatusCode::NOT_FOUND => DocError::NotFound(message),
        _ => DocError::Transport(format!("HTTP {}: {}", status, message)),
    }
}

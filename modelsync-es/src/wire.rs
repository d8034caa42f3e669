//! Request and response bodies of the REST API.

use modelsync::analysis::AnalysisSettings;
use modelsync::engine::{BulkItemResult, BulkResponse};
use modelsync::{BulkItem, BulkOperation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EsError, Result};

#[derive(Debug, Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type")]
    doc_type: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// NDJSON body for `POST /_bulk`. Upserts are sent as `index` actions so the
/// stored document is replaced wholesale.
pub fn bulk_body(index: &str, items: &[BulkItem]) -> Result<String> {
    let mut body = String::new();
    for item in items {
        let meta = ActionMeta {
            index,
            doc_type: &item.doc_type,
            id: &item.id,
        };
        match item.op {
            BulkOperation::Upsert => {
                let document = item.document.as_ref().ok_or_else(|| {
                    EsError::Response(format!("upsert of '{}' carries no document", item.id))
                })?;
                body.push_str(&serde_json::to_string(&json!({ "index": meta }))?);
                body.push('\n');
                body.push_str(&serde_json::to_string(document)?);
                body.push('\n');
            }
            BulkOperation::Delete => {
                body.push_str(&serde_json::to_string(&json!({ "delete": meta }))?);
                body.push('\n');
            }
        }
    }
    Ok(body)
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsBulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    pub items: Vec<BulkItemResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkItemResponse {
    pub index: Option<BulkItemStatus>,
    pub create: Option<BulkItemStatus>,
    pub update: Option<BulkItemStatus>,
    pub delete: Option<BulkItemStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkItemStatus {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub result: Option<String>,
    pub status: u16,
    /// An object `{type, reason}` on current servers, a plain string on old ones.
    #[serde(default)]
    pub error: Option<Value>,
}

impl BulkItemResponse {
    fn into_result(self) -> Option<BulkItemResult> {
        let (op, status) = match (self.index, self.create, self.update, self.delete) {
            (_, _, _, Some(status)) => (BulkOperation::Delete, status),
            (Some(status), _, _, _) | (_, Some(status), _, _) | (_, _, Some(status), _) => {
                (BulkOperation::Upsert, status)
            }
            _ => return None,
        };
        Some(match status.error {
            Some(error) => BulkItemResult::failed(status.id, op, status.status, error_reason(&error)),
            None => BulkItemResult::ok(status.id, op, status.status),
        })
    }
}

impl EsBulkResponse {
    pub fn into_engine_response(self) -> Result<BulkResponse> {
        let items = self
            .items
            .into_iter()
            .map(|item| {
                item.into_result()
                    .ok_or_else(|| EsError::Response("bulk item without an action".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BulkResponse { items })
    }
}

/// `type: reason` from an error value, or its raw text.
pub fn error_reason(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            let kind = obj.get("type").and_then(Value::as_str);
            let reason = obj.get("reason").and_then(Value::as_str);
            match (kind, reason) {
                (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
                (Some(kind), None) => kind.to_string(),
                (None, Some(reason)) => reason.to_string(),
                (None, None) => error.to_string(),
            }
        }
        other => other.to_string(),
    }
}

/// Reason carried by an error response body.
pub fn body_reason(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("error") {
            Some(error) => error_reason(error),
            None => value.to_string(),
        },
        Err(_) => body.trim().chars().take(512).collect(),
    }
}

/// Body of `PUT /{index}`.
pub fn create_index_body(analysis: &AnalysisSettings) -> Value {
    if analysis.is_empty() {
        json!({})
    } else {
        json!({ "settings": { "analysis": analysis.to_value() } })
    }
}

/// The doc-type body out of a `GET /{index}/_mapping/{doc_type}` response.
/// Responses are keyed by the concrete index name, which differs from the
/// requested one behind an alias.
pub fn extract_mapping(response: &Value, doc_type: &str) -> Option<Value> {
    response
        .as_object()?
        .values()
        .next()?
        .get("mappings")?
        .get(doc_type)
        .cloned()
}

/// Analysis settings out of a `GET /{index}/_settings` response. An index
/// without analysis settings yields an empty set.
pub fn extract_analysis(response: &Value) -> Result<AnalysisSettings> {
    let analysis = response
        .as_object()
        .and_then(|indices| indices.values().next())
        .and_then(|index| index.pointer("/settings/index/analysis"))
        .cloned();
    match analysis {
        Some(value) => AnalysisSettings::from_value(value)
            .map_err(|e| EsError::Response(format!("analysis settings: {e}"))),
        None => Ok(AnalysisSettings::new()),
    }
}

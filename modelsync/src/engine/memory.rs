//! An in-process engine for tests. It keeps mappings, analysis settings and
//! documents per connection and records every call made against it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::analysis::AnalysisSettings;
use crate::engine::{BulkItem, BulkItemResult, BulkOperation, BulkResponse, EngineResult, SearchEngine};
use crate::error::EngineError;
use crate::schema::MappingPayload;

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateMapping { connection: String, doc_type: String },
    DeleteMapping { connection: String, doc_type: String },
    Bulk { connection: String, items: Vec<BulkItem> },
    GetMapping { connection: String, doc_type: String },
    GetAnalysis { connection: String },
    UpdateAnalysis { connection: String, settings: AnalysisSettings },
}

#[derive(Debug, Default)]
struct MemoryIndex {
    analysis: AnalysisSettings,
    mappings: BTreeMap<String, Value>,
    documents: BTreeMap<String, BTreeMap<String, Map<String, Value>>>,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, MemoryIndex>,
    calls: Vec<EngineCall>,
    rejected: HashMap<String, String>,
    down: BTreeSet<String>,
    failing_doc_types: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryEngine {
    known: Option<BTreeSet<String>>,
    state: Mutex<State>,
}

impl MemoryEngine {
    /// An engine that accepts any connection name.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine that only knows the given connections.
    pub fn with_connections<I, S>(connections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(connections.into_iter().map(Into::into).collect()),
            state: Mutex::default(),
        }
    }

    /// Make bulk upserts of document `id` fail with `reason`.
    pub fn reject(&self, id: impl Into<String>, reason: impl Into<String>) {
        self.state.lock().rejected.insert(id.into(), reason.into());
    }

    /// Fail every call against `connection`.
    pub fn take_down(&self, connection: impl Into<String>) {
        self.state.lock().down.insert(connection.into());
    }

    pub fn bring_up(&self, connection: &str) {
        self.state.lock().down.remove(connection);
    }

    /// Fail every bulk request that touches `doc_type`.
    pub fn fail_bulk_for(&self, doc_type: impl Into<String>) {
        self.state.lock().failing_doc_types.insert(doc_type.into());
    }

    /// Overwrite the live analysis of a connection's index, creating the
    /// index when needed.
    pub fn set_analysis(&self, connection: impl Into<String>, settings: AnalysisSettings) {
        self.state
            .lock()
            .indices
            .entry(connection.into())
            .or_default()
            .analysis = settings;
    }

    /// Replace a live mapping body directly, bypassing the call log.
    pub fn set_mapping(&self, connection: impl Into<String>, doc_type: impl Into<String>, body: Value) {
        self.state
            .lock()
            .indices
            .entry(connection.into())
            .or_default()
            .mappings
            .insert(doc_type.into(), body);
    }

    /// Store a document directly, bypassing the call log.
    pub fn insert_document(
        &self,
        connection: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        document: Map<String, Value>,
    ) {
        self.state
            .lock()
            .indices
            .entry(connection.into())
            .or_default()
            .documents
            .entry(doc_type.into())
            .or_default()
            .insert(id.into(), document);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Item lists of every bulk call, in call order.
    pub fn bulk_calls(&self) -> Vec<(String, Vec<BulkItem>)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Bulk { connection, items } => Some((connection.clone(), items.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn documents(&self, connection: &str, doc_type: &str) -> BTreeMap<String, Map<String, Value>> {
        self.state
            .lock()
            .indices
            .get(connection)
            .and_then(|index| index.documents.get(doc_type))
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, connection: &str, doc_type: &str, id: &str) -> Option<Map<String, Value>> {
        self.documents(connection, doc_type).remove(id)
    }

    pub fn mapping(&self, connection: &str, doc_type: &str) -> Option<Value> {
        self.state
            .lock()
            .indices
            .get(connection)
            .and_then(|index| index.mappings.get(doc_type))
            .cloned()
    }

    pub fn analysis(&self, connection: &str) -> Option<AnalysisSettings> {
        self.state
            .lock()
            .indices
            .get(connection)
            .map(|index| index.analysis.clone())
    }

    fn check(&self, state: &State, connection: &str) -> EngineResult<()> {
        if let Some(known) = &self.known {
            if !known.contains(connection) {
                return Err(EngineError::UnknownConnection(connection.to_string()));
            }
        }
        if state.down.contains(connection) {
            return Err(EngineError::Connection(format!(
                "connection '{}' is unreachable",
                connection
            )));
        }
        Ok(())
    }
}

/// Field types that differ between two mapping bodies.
fn conflicting_fields(existing: &Value, incoming: &Value) -> Vec<String> {
    let (Some(old), Some(new)) = (
        existing.get("properties").and_then(Value::as_object),
        incoming.get("properties").and_then(Value::as_object),
    ) else {
        return Vec::new();
    };
    new.iter()
        .filter_map(|(name, def)| {
            let before = old.get(name)?.get("type")?;
            (def.get("type") != Some(before)).then(|| name.clone())
        })
        .collect()
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn create_mapping(&self, connection: &str, payload: &MappingPayload) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::CreateMapping {
            connection: connection.to_string(),
            doc_type: payload.doc_type.clone(),
        });
        self.check(&state, connection)?;

        let body = payload.body().cloned().unwrap_or(Value::Null);
        let index = state
            .indices
            .entry(connection.to_string())
            .or_insert_with(|| MemoryIndex {
                analysis: payload.analysis.clone(),
                ..MemoryIndex::default()
            });
        if let Some(existing) = index.mappings.get(&payload.doc_type) {
            let conflicts = conflicting_fields(existing, &body);
            if !conflicts.is_empty() {
                return Err(EngineError::MappingConflict(format!(
                    "{}: field type changed for {}",
                    payload.doc_type,
                    conflicts.join(", ")
                )));
            }
        }
        index.mappings.insert(payload.doc_type.clone(), body);
        Ok(())
    }

    async fn delete_mapping(&self, connection: &str, doc_type: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::DeleteMapping {
            connection: connection.to_string(),
            doc_type: doc_type.to_string(),
        });
        self.check(&state, connection)?;

        if let Some(index) = state.indices.get_mut(connection) {
            index.mappings.remove(doc_type);
            index.documents.remove(doc_type);
        }
        Ok(())
    }

    async fn bulk(&self, connection: &str, items: Vec<BulkItem>) -> EngineResult<BulkResponse> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Bulk {
            connection: connection.to_string(),
            items: items.clone(),
        });
        self.check(&state, connection)?;

        if let Some(doc_type) = items
            .iter()
            .map(|item| &item.doc_type)
            .find(|doc_type| state.failing_doc_types.contains(*doc_type))
        {
            return Err(EngineError::Other(format!("bulk request for '{}' failed", doc_type)));
        }

        let rejected = state.rejected.clone();
        let index = state.indices.entry(connection.to_string()).or_default();
        let mut response = BulkResponse::default();
        for item in items {
            let docs = index.documents.entry(item.doc_type.clone()).or_default();
            let result = match item.op {
                BulkOperation::Upsert => match (rejected.get(&item.id), item.document) {
                    (Some(reason), _) => BulkItemResult::failed(item.id, item.op, 400, reason.clone()),
                    (None, None) => {
                        BulkItemResult::failed(item.id, item.op, 400, "upsert without a document")
                    }
                    (None, Some(document)) => {
                        let status = if docs.insert(item.id.clone(), document).is_some() {
                            200
                        } else {
                            201
                        };
                        BulkItemResult::ok(item.id, item.op, status)
                    }
                },
                BulkOperation::Delete => {
                    let status = if docs.remove(&item.id).is_some() { 200 } else { 404 };
                    BulkItemResult::ok(item.id, item.op, status)
                }
            };
            response.items.push(result);
        }
        Ok(response)
    }

    async fn get_current_mapping(&self, connection: &str, doc_type: &str) -> EngineResult<Option<Value>> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::GetMapping {
            connection: connection.to_string(),
            doc_type: doc_type.to_string(),
        });
        self.check(&state, connection)?;

        Ok(state
            .indices
            .get(connection)
            .and_then(|index| index.mappings.get(doc_type))
            .cloned())
    }

    async fn get_analysis(&self, connection: &str) -> EngineResult<Option<AnalysisSettings>> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::GetAnalysis {
            connection: connection.to_string(),
        });
        self.check(&state, connection)?;

        Ok(state
            .indices
            .get(connection)
            .map(|index| index.analysis.stringified()))
    }

    async fn update_analysis(&self, connection: &str, settings: &AnalysisSettings) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::UpdateAnalysis {
            connection: connection.to_string(),
            settings: settings.clone(),
        });
        self.check(&state, connection)?;

        let index = state
            .indices
            .get_mut(connection)
            .ok_or_else(|| EngineError::NotFound(format!("index for connection '{}'", connection)))?;
        index.analysis = settings.clone();
        Ok(())
    }
}

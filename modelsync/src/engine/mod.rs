//! The search-engine side of synchronization.

pub mod memory;

pub use memory::{EngineCall, MemoryEngine};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::analysis::AnalysisSettings;
use crate::document::Document;
use crate::error::EngineError;
use crate::schema::MappingPayload;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    Upsert,
    Delete,
}

impl BulkOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a bulk request. Deletes carry no document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub doc_type: String,
    pub op: BulkOperation,
    pub id: String,
    pub document: Option<Map<String, Value>>,
}

impl BulkItem {
    pub fn upsert(doc_type: impl Into<String>, document: Document) -> Self {
        Self {
            doc_type: doc_type.into(),
            op: BulkOperation::Upsert,
            id: document.id,
            document: Some(document.source),
        }
    }

    pub fn delete(doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            op: BulkOperation::Delete,
            id: id.into(),
            document: None,
        }
    }
}

/// Outcome of one bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub id: String,
    pub op: BulkOperation,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(id: impl Into<String>, op: BulkOperation, status: u16) -> Self {
        Self {
            id: id.into(),
            op,
            status,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, op: BulkOperation, status: u16, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            op,
            status,
            error: Some(error.into()),
        }
    }

    /// Deleting a document that is already gone counts as success.
    pub fn is_ok(&self) -> bool {
        match self.op {
            BulkOperation::Delete if self.status == 404 => true,
            _ => self.error.is_none() && (200..300).contains(&self.status),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|item| !item.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter(|item| !item.is_ok())
    }
}

/// Operations the synchronization core needs from a search engine. Every
/// call names the connection it targets.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Create the connection's index with `payload.analysis` when it does not
    /// exist yet, then put the doc-type mapping.
    async fn create_mapping(&self, connection: &str, payload: &MappingPayload) -> EngineResult<()>;

    /// Drop a doc type and its documents. An absent mapping is not an error.
    async fn delete_mapping(&self, connection: &str, doc_type: &str) -> EngineResult<()>;

    async fn bulk(&self, connection: &str, items: Vec<BulkItem>) -> EngineResult<BulkResponse>;

    /// The live mapping for a doc type, `None` when it does not exist.
    async fn get_current_mapping(&self, connection: &str, doc_type: &str) -> EngineResult<Option<Value>>;

    /// Live analysis settings, `None` when the index does not exist.
    async fn get_analysis(&self, connection: &str) -> EngineResult<Option<AnalysisSettings>>;

    /// Replace the index analysis settings in place (close, update, reopen).
    async fn update_analysis(&self, connection: &str, settings: &AnalysisSettings) -> EngineResult<()>;
}

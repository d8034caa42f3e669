//! modelsync: keep a search index in step with relational records.
//!
//! A [`Schema`] describes how one model becomes one document type. The
//! [`SyncPipeline`] reacts to record mutations, immediately or batched while
//! suspended, and [`IndexMaintenance`] clears, updates and rebuilds indices
//! on demand.

pub mod analysis;
pub mod config;
pub mod connections;
pub mod document;
pub mod engine;
pub mod error;
pub mod field;
pub mod maintenance;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod schema;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod value;

pub use config::Config;
pub use connections::ConnectionRegistry;
pub use document::{Document, DocumentBuilder};
pub use engine::{BulkItem, BulkOperation, BulkResponse, SearchEngine};
pub use error::{EngineError, Error, FailureKind, Result, SyncErrors, SyncFailure};
pub use field::{EngineType, Field};
pub use maintenance::{parse_date_time, IndexMaintenance, MaintenanceReport, NoInput, RebuildOptions};
pub use model::{ModelKey, ModelMeta};
pub use registry::{SchemaRegistry, Selection};
pub use schema::{IndexDefinition, Schema};
pub use store::{DataStore, DateRange, EventBus, LifecycleEvent};
pub use sync::SyncPipeline;
pub use value::{Attributes, Record, Row, SourceValue};

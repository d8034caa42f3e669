use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed lookup for key [{segment}] in {value} (path '{path}')")]
    FieldResolution {
        path: String,
        segment: String,
        value: String,
    },

    #[error("Cannot serialize field '{field}': {reason}")]
    FieldSerialization { field: String, reason: String },

    #[error("Schema config error: {0}")]
    SchemaConfig(String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Schema '{doc_type}' has no date_field, cannot update a bounded time window")]
    UnboundedUpdate { doc_type: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Suspension error: {0}")]
    Suspension(String),

    #[error("Index drift on connection '{connection}':{diff}")]
    AnalysisDrift { connection: String, diff: String },

    #[error("{0} could not be interpreted as a datetime")]
    InvalidDateTime(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Sync(SyncErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[cfg(feature = "store-sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// True for failures that only invalidate one document, not the batch.
    pub fn is_document_local(&self) -> bool {
        matches!(
            self,
            Error::FieldResolution { .. } | Error::FieldSerialization { .. }
        )
    }
}

/// Failures raised at the search-engine boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Mapping conflict: {0}")]
    MappingConflict(String),

    #[error("Document '{id}' rejected: {reason}")]
    Rejected { id: String, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Which stage of the pipeline a [`SyncFailure`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Building the document failed; the object was left out of its batch.
    Build,
    /// The engine rejected a single bulk item.
    Item,
    /// A whole bulk request failed.
    Group,
    /// The schema could not be processed at all (bad window, missing mapping).
    Schema,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Item => write!(f, "item"),
            Self::Group => write!(f, "group"),
            Self::Schema => write!(f, "schema"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub connection: String,
    pub doc_type: String,
    pub pk: Option<String>,
    pub kind: FailureKind,
    pub reason: String,
}

impl SyncFailure {
    pub fn new(
        kind: FailureKind,
        connection: impl Into<String>,
        doc_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            connection: connection.into(),
            doc_type: doc_type.into(),
            pk: None,
            kind,
            reason: reason.into(),
        }
    }

    pub fn with_pk(mut self, pk: impl Into<String>) -> Self {
        self.pk = Some(pk.into());
        self
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}/{}", self.kind, self.connection, self.doc_type)?;
        if let Some(pk) = &self.pk {
            write!(f, " pk={}", pk)?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Aggregate of every per-item and per-group failure collected at a batch boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncErrors {
    pub failures: Vec<SyncFailure>,
}

impl SyncErrors {
    pub fn new(failures: Vec<SyncFailure>) -> Self {
        Self { failures }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn of_kind(&self, kind: FailureKind) -> impl Iterator<Item = &SyncFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an [`Error::Sync`].
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Sync(self))
        }
    }
}

impl fmt::Display for SyncErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sync failure(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncErrors {}

pub type Result<T> = std::result::Result<T, Error>;

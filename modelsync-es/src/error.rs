//! Error types for the REST engine

use modelsync::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum EsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No host of connection '{connection}' answered: {reason}")]
    Unreachable { connection: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed with status {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Unexpected response: {0}")]
    Response(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),
}

pub type Result<T> = std::result::Result<T, EsError>;

impl From<EsError> for EngineError {
    fn from(err: EsError) -> Self {
        match err {
            EsError::Unreachable { .. } => EngineError::Connection(err.to_string()),
            EsError::Http(ref e) if e.is_connect() || e.is_timeout() => {
                EngineError::Connection(err.to_string())
            }
            EsError::NotFound(what) => EngineError::NotFound(what),
            EsError::UnknownConnection(name) => EngineError::UnknownConnection(name),
            EsError::Status { status: 400, ref reason }
                if reason.starts_with("illegal_argument_exception")
                    || reason.starts_with("merge_mapping_exception") =>
            {
                EngineError::MappingConflict(reason.clone())
            }
            other => EngineError::Other(other.to_string()),
        }
    }
}

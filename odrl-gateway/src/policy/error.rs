use crate::graph::{GraphError, ValidationReport};

/// Every failure a gateway operation can report to its caller.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Policy graph does not conform to the ODRL shapes: {}", .0.summary())]
    SchemaViolation(ValidationReport),
    #[error("Invalid function: {0}")]
    InvalidFunction(String),
    #[error("Evaluation error: {0}")]
    Evaluation(String),
    #[error("Upstream fetch error: {0}")]
    UpstreamFetch(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Unsupported MIME type, only supported application/ld+json")]
    UnsupportedMediaType,
    #[error("Query error: {0}")]
    Query(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for PolicyError {
    fn from(e: std::io::Error) -> Self {
        PolicyError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(e: serde_json::Error) -> Self {
        PolicyError::Serialization(e.to_string())
    }
}

impl From<GraphError> for PolicyError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Mapping(msg) => PolicyError::Validation(msg),
            GraphError::UnsupportedQuery(_) => PolicyError::Query(e.to_string()),
            GraphError::Parse { .. } => PolicyError::Query(e.to_string()),
        }
    }
}

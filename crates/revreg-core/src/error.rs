use thiserror::Error;

/// Error surfaced by the collaborator traits (store, accumulator, registrar).
///
/// Implementations convert their own error types into this one so the
/// engine can wrap them with context without knowing the backend.
#[derive(Debug, Error)]
pub enum RevRegError {
    #[error("store error: {0}")]
    Store(String),

    #[error("record already exists: {category}/{name}")]
    DuplicateRecord { category: String, name: String },

    #[error("record not found: {category}/{name}")]
    RecordNotFound { category: String, name: String },

    #[error("accumulator error: {0}")]
    Accumulator(String),

    #[error("registrar error: {0}")]
    Registrar(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RevRegError {
    fn from(e: serde_json::Error) -> Self {
        RevRegError::Serialization(e.to_string())
    }
}

pub type RevRegResult<T> = Result<T, RevRegError>;

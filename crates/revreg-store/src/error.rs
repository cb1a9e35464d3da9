use revreg_core::RevRegError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("record already exists: {category}/{name}")]
    Duplicate { category: String, name: String },

    #[error("record not found: {category}/{name}")]
    NotFound { category: String, name: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt record {category}/{name}: {reason}")]
    Corrupt {
        category: String,
        name: String,
        reason: String,
    },
}

impl From<StoreError> for RevRegError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { category, name } => {
                RevRegError::DuplicateRecord { category, name }
            }
            StoreError::NotFound { category, name } => {
                RevRegError::RecordNotFound { category, name }
            }
            other => RevRegError::Store(other.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

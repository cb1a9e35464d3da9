use revreg_core::{RegistryState, RevRegError};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("registry size {size} outside allowed range {min}..={max}")]
    BadRegistrySize { size: u32, min: u32, max: u32 },

    #[error("credential definition {0} does not support revocation")]
    RevocationNotSupported(String),

    #[error("credential values have no value for schema attribute '{0}'")]
    MissingCredentialValue(String),

    /// Expected control flow: the caller selects or creates another registry.
    #[error("registry {0} is full")]
    RegistryFull(String),

    #[error("revocation of registry {registry_id} gave up after {attempts} conflicting attempts")]
    RevocationConflict { registry_id: String, attempts: u32 },

    #[error("accumulator error: {0}")]
    Accumulator(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("registrar error: {0}")]
    Registrar(String),

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid registry state transition: {from} -> {to}")]
    InvalidTransition {
        from: RegistryState,
        to: RegistryState,
    },

    #[error("no active registry for credential definition {0}")]
    NoActiveRegistry(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<EngineError> for RevRegError {
    fn from(e: EngineError) -> Self {
        RevRegError::Internal(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Context wrapping for collaborator errors
// ---------------------------------------------------------------------------

/// Attach what the engine was doing to a collaborator error.
pub(crate) trait Context<T> {
    fn store_ctx(self, what: impl fmt::Display) -> EngineResult<T>;
    fn accum_ctx(self, what: impl fmt::Display) -> EngineResult<T>;
    fn registrar_ctx(self, what: impl fmt::Display) -> EngineResult<T>;
}

impl<T> Context<T> for Result<T, RevRegError> {
    fn store_ctx(self, what: impl fmt::Display) -> EngineResult<T> {
        self.map_err(|e| match e {
            RevRegError::Serialization(msg) => {
                EngineError::Serialization(format!("{}: {}", what, msg))
            }
            other => EngineError::Store(format!("{}: {}", what, other)),
        })
    }

    fn accum_ctx(self, what: impl fmt::Display) -> EngineResult<T> {
        self.map_err(|e| EngineError::Accumulator(format!("{}: {}", what, e)))
    }

    fn registrar_ctx(self, what: impl fmt::Display) -> EngineResult<T> {
        self.map_err(|e| EngineError::Registrar(format!("{}: {}", what, e)))
    }
}

use revreg_core::RevRegError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("no registrar supports issuer {0}")]
    NoRegistrar(String),

    #[error("multiple registrars support issuer {issuer}: {names:?}")]
    AmbiguousRegistrar { issuer: String, names: Vec<String> },

    #[error("unknown registration job: {0}")]
    UnknownJob(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<RegistrarError> for RevRegError {
    fn from(e: RegistrarError) -> Self {
        RevRegError::Registrar(e.to_string())
    }
}

pub type RegistrarResult<T> = Result<T, RegistrarError>;

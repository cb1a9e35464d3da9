use thiserror::Error;

/// Error type for the revreg root binary, aggregating errors from the
/// component crates.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("engine error: {0}")]
    Engine(#[from] revreg_engine::EngineError),

    #[error("store error: {0}")]
    Store(#[from] revreg_store::StoreError),

    #[error("registrar error: {0}")]
    Registrar(#[from] revreg_registrar::RegistrarError),

    #[error("{0}")]
    Core(#[from] revreg_core::RevRegError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;

//! revreg root library
//!
//! Configuration, error aggregation and wiring for the revocation registry
//! service. The binary in `main.rs` is a thin CLI over [`RootState`].
//!
//! # Wiring
//!
//! [`initialize_root`] opens the record store selected by the configuration,
//! installs the reference SHA-256 accumulator and a registrar set holding
//! the local registrar, and hands all three to a
//! [`revreg_engine::RevRegService`].

pub mod config;
pub mod error;

pub use config::{
    IssuanceConfig, RegistrarConfig, RegistryConfig, RevocationConfig, RootConfig, StoreBackend,
    StoreConfig,
};
pub use error::{RootError, RootResult};

use revreg_accum::Sha256Accumulator;
use revreg_core::RecordStore;
use revreg_engine::{EngineContext, RevRegService};
use revreg_registrar::{LocalRegistrar, RegistrarSet};
use revreg_store::{InMemoryStore, SqliteStore};
use std::sync::Arc;
use tracing::info;

/// Name the built-in registrar reports.
pub const LOCAL_REGISTRAR_NAME: &str = "local";

/// Initialized root state: configuration plus the wired service.
#[derive(Clone)]
pub struct RootState {
    pub config: RootConfig,
    pub service: RevRegService,
    /// The local registrar, kept for completing jobs in `wait` mode.
    pub registrar: Arc<LocalRegistrar>,
}

/// Open the store and wire the engine.
pub fn initialize_root(config: RootConfig) -> RootResult<RootState> {
    config.validate()?;

    let store = open_store(&config)?;

    let registrar = Arc::new(LocalRegistrar::new(
        LOCAL_REGISTRAR_NAME,
        config.registrar.method_prefix.clone(),
        config.registrar.mode,
    ));
    let registrars = RegistrarSet::new().with(registrar.clone());

    let ctx = EngineContext::new(
        store,
        Arc::new(Sha256Accumulator::new()),
        Arc::new(registrars),
        config.engine_config(),
    );

    info!(
        backend = ?config.store.backend,
        registrar_mode = ?config.registrar.mode,
        "revreg initialized"
    );

    Ok(RootState {
        service: RevRegService::new(ctx),
        registrar,
        config,
    })
}

fn open_store(config: &RootConfig) -> RootResult<Arc<dyn RecordStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::Sqlite => {
            let path = config.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let path_str = path.to_str().ok_or_else(|| {
                RootError::Config(format!("database path is not UTF-8: {}", path.display()))
            })?;
            let store = SqliteStore::open(path_str)?;
            info!(path = %path.display(), "sqlite store opened");
            Ok(Arc::new(store))
        }
    }
}

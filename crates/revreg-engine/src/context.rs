use crate::error::{EngineError, EngineResult};
use revreg_core::{AccumulatorLibrary, RecordStore, Registrar, RegistryType};
use std::sync::Arc;
use std::time::Duration;

/// Smallest registry the engine will create.
pub const MIN_REGISTRY_SIZE: u32 = 4;
/// Largest registry the engine will create.
pub const MAX_REGISTRY_SIZE: u32 = 32768;
/// Attempt bound for one revocation batch.
pub const DEFAULT_REVOCATION_ATTEMPTS: u32 = 5;
/// Base tails files are published under when none is configured.
pub const DEFAULT_TAILS_BASE: &str = "tails";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub min_registry_size: u32,
    pub max_registry_size: u32,
    /// Capacity of registries created by the selector and by `mark_full`.
    pub default_capacity: u32,
    pub registry_type: RegistryType,
    pub max_revocation_attempts: u32,
    pub issuance_retries: u32,
    pub issuance_retry_delay: Duration,
    /// Prefix of the location recorded for each registry's tails file.
    pub tails_base: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_registry_size: MIN_REGISTRY_SIZE,
            max_registry_size: MAX_REGISTRY_SIZE,
            default_capacity: 100,
            registry_type: RegistryType::ClAccum,
            max_revocation_attempts: DEFAULT_REVOCATION_ATTEMPTS,
            issuance_retries: 5,
            issuance_retry_delay: Duration::from_secs(2),
            tails_base: DEFAULT_TAILS_BASE.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn check_size(&self, size: u32) -> EngineResult<()> {
        if size < self.min_registry_size || size > self.max_registry_size {
            return Err(EngineError::BadRegistrySize {
                size,
                min: self.min_registry_size,
                max: self.max_registry_size,
            });
        }
        Ok(())
    }

    /// Location recorded for the tails file with `tails_hash`.
    pub fn tails_location(&self, tails_hash: &str) -> String {
        format!("{}/{}", self.tails_base.trim_end_matches('/'), tails_hash)
    }
}

/// Collaborators shared by every engine component.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn RecordStore>,
    pub accumulator: Arc<dyn AccumulatorLibrary>,
    pub registrar: Arc<dyn Registrar>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        accumulator: Arc<dyn AccumulatorLibrary>,
        registrar: Arc<dyn Registrar>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            accumulator,
            registrar,
            config,
        }
    }
}

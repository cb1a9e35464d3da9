pub mod allocator;
pub mod cache;
pub mod context;
pub mod cred_def;
pub mod error;
pub mod issuance;
pub mod lifecycle;
pub mod occ;
pub mod records;
pub mod registry;
pub mod revocation;
pub mod selector;
pub mod service;

pub use allocator::IndexAllocator;
pub use cache::StatusListCache;
pub use context::{EngineConfig, EngineContext};
pub use cred_def::CredDefManager;
pub use error::*;
pub use issuance::Issuer;
pub use occ::{Attempt, OptimisticRetry, Settled};
pub use registry::RegistryManager;
pub use revocation::{
    FailedIndex, OutcomeKind, PendingOutcome, RevocationEngine, RevocationFailure,
    RevocationOutcome,
};
pub use selector::ActiveRegistrySelector;
pub use service::RevRegService;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::context::{EngineConfig, EngineContext};
    use crate::cred_def::CredDefManager;
    use revreg_accum::Sha256Accumulator;
    use revreg_core::{CredentialDefinition, IssuerId, SchemaId};
    use revreg_registrar::{LocalRegistrar, RegistrarMode};
    use revreg_store::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    pub fn context_with_mode(mode: RegistrarMode) -> (EngineContext, Arc<LocalRegistrar>) {
        let registrar = Arc::new(LocalRegistrar::new("local", "did:", mode));
        let config = EngineConfig {
            default_capacity: 4,
            issuance_retry_delay: Duration::ZERO,
            ..EngineConfig::default()
        };
        let ctx = EngineContext::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(Sha256Accumulator::new()),
            registrar.clone(),
            config,
        );
        (ctx, registrar)
    }

    pub fn context() -> (EngineContext, Arc<LocalRegistrar>) {
        context_with_mode(RegistrarMode::Finish)
    }

    pub fn revocable_cred_def(ctx: &EngineContext) -> CredentialDefinition {
        CredDefManager::new(ctx.clone())
            .register_credential_definition(
                &IssuerId::new("did:sov:issuer"),
                &SchemaId::new("did:sov:issuer:2:degree:1.0"),
                &["name"],
                "default",
                true,
            )
            .unwrap()
    }
}

use crate::allocator::IndexAllocator;
use crate::context::EngineContext;
use crate::cred_def::CredDefManager;
use crate::issuance::Issuer;
use crate::registry::RegistryManager;
use crate::revocation::RevocationEngine;
use crate::selector::ActiveRegistrySelector;

/// Every engine component wired to one shared context.
///
/// Components are cheap handles; the only state held in process is the
/// status list cache owned by [`RevocationEngine`].
#[derive(Clone)]
pub struct RevRegService {
    ctx: EngineContext,
    cred_defs: CredDefManager,
    registries: RegistryManager,
    allocator: IndexAllocator,
    revocation: RevocationEngine,
    selector: ActiveRegistrySelector,
    issuer: Issuer,
}

impl RevRegService {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            cred_defs: CredDefManager::new(ctx.clone()),
            registries: RegistryManager::new(ctx.clone()),
            allocator: IndexAllocator::new(ctx.clone()),
            revocation: RevocationEngine::new(ctx.clone()),
            selector: ActiveRegistrySelector::new(ctx.clone()),
            issuer: Issuer::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn cred_defs(&self) -> &CredDefManager {
        &self.cred_defs
    }

    pub fn registries(&self) -> &RegistryManager {
        &self.registries
    }

    pub fn allocator(&self) -> &IndexAllocator {
        &self.allocator
    }

    pub fn revocation(&self) -> &RevocationEngine {
        &self.revocation
    }

    pub fn selector(&self) -> &ActiveRegistrySelector {
        &self.selector
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }
}

use crate::allocator::IndexAllocator;
use crate::context::EngineContext;
use crate::cred_def::CredDefManager;
use crate::error::{Context, EngineError, EngineResult};
use crate::registry::RegistryManager;
use crate::selector::ActiveRegistrySelector;
use revreg_core::{CredDefId, IssuedCredential};
use std::collections::BTreeMap;

/// Issues credentials, reserving a registry index first for revocable ones.
#[derive(Clone)]
pub struct Issuer {
    ctx: EngineContext,
    cred_defs: CredDefManager,
    registries: RegistryManager,
    allocator: IndexAllocator,
    selector: ActiveRegistrySelector,
}

impl Issuer {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            cred_defs: CredDefManager::new(ctx.clone()),
            registries: RegistryManager::new(ctx.clone()),
            allocator: IndexAllocator::new(ctx.clone()),
            selector: ActiveRegistrySelector::new(ctx.clone()),
            ctx,
        }
    }

    /// Issue one credential over `values`.
    ///
    /// Values must cover every schema attribute; a request missing one is
    /// rejected before any index is reserved. Blocks between retries while no
    /// registry is ready. Credential material is created after the index is
    /// committed, so a failure there loses the index.
    pub fn issue_credential(
        &self,
        cred_def_id: &CredDefId,
        values: &BTreeMap<String, String>,
    ) -> EngineResult<IssuedCredential> {
        let cred_def = self.cred_defs.get(cred_def_id)?;
        if let Some(attribute) = cred_def.missing_attribute(values) {
            return Err(EngineError::MissingCredentialValue(attribute.to_string()));
        }
        let cred_def_key = self.cred_defs.private_key(cred_def_id)?;

        if !cred_def.support_revocation {
            let credential = self
                .ctx
                .accumulator
                .create_credential(&cred_def, &cred_def_key, values, None)
                .accum_ctx(format!("creating credential for {}", cred_def_id))?;
            tracing::info!(cred_def_id = %cred_def_id, "credential issued");
            return Ok(credential);
        }

        let retries = self.ctx.config.issuance_retries.max(1);
        for attempt in 1..=retries {
            let registry = match self.selector.get_active_registry(cred_def_id)? {
                Some(registry) => registry,
                None => {
                    tracing::debug!(
                        cred_def_id = %cred_def_id,
                        attempt,
                        "no active registry, waiting"
                    );
                    std::thread::sleep(self.ctx.config.issuance_retry_delay);
                    continue;
                }
            };

            let index = match self.allocator.allocate_index(&registry.id) {
                Ok(index) => index,
                Err(EngineError::RegistryFull(_)) => {
                    self.registries.mark_full(&registry.id)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let registry_key = self.registries.private_key(&registry.id)?;
            let credential = self
                .ctx
                .accumulator
                .create_credential(
                    &cred_def,
                    &cred_def_key,
                    values,
                    Some((&registry, &registry_key, index)),
                )
                .accum_ctx(format!(
                    "creating credential at index {} of {}",
                    index, registry.id
                ))?;

            if index == registry.max_cred_num {
                self.registries.mark_full(&registry.id)?;
            }

            tracing::info!(
                cred_def_id = %cred_def_id,
                registry_id = %registry.id,
                index,
                "credential issued"
            );
            return Ok(credential);
        }

        Err(EngineError::NoActiveRegistry(cred_def_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, revocable_cred_def};
    use revreg_accum::verify_credential;
    use revreg_core::{IssuerId, RegistryState, SchemaId};
    use revreg_registrar::RegistrarMode;

    fn values() -> BTreeMap<String, String> {
        BTreeMap::from([("name".to_string(), "Alice".to_string())])
    }

    #[test]
    fn test_non_revocable_skips_registry() {
        let (ctx, _) = context();
        let cd = CredDefManager::new(ctx.clone())
            .register_credential_definition(
                &IssuerId::new("did:sov:issuer"),
                &SchemaId::new("schema"),
                &["name"],
                "plain",
                false,
            )
            .unwrap();
        let cred = Issuer::new(ctx.clone()).issue_credential(&cd.id, &values()).unwrap();
        assert!(cred.registry_id.is_none());
        assert!(cred.index.is_none());
        assert!(RegistryManager::new(ctx)
            .list_registries(None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_issuance_rolls_over_to_successor() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let issuer = Issuer::new(ctx.clone());
        let registries = RegistryManager::new(ctx.clone());

        let mut issued = Vec::new();
        for _ in 0..(ctx.config.default_capacity + 1) {
            issued.push(issuer.issue_credential(&cd.id, &values()).unwrap());
        }

        let first = issued[0].registry_id.clone().unwrap();
        let last = issued.last().unwrap();
        assert_ne!(last.registry_id.as_ref(), Some(&first));
        assert_eq!(last.index, Some(1));
        assert_eq!(registries.get_registry(&first).unwrap().state, RegistryState::Full);

        let key = CredDefManager::new(ctx).private_key(&cd.id).unwrap();
        let reg = registries.get_registry(&first).unwrap();
        assert!(verify_credential(&issued[0], &key, Some(&reg)));
    }

    #[test]
    fn test_missing_value_rejected_before_allocation() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let issuer = Issuer::new(ctx.clone());
        let registries = RegistryManager::new(ctx.clone());

        let first = issuer.issue_credential(&cd.id, &values()).unwrap();
        let registry_id = first.registry_id.unwrap();
        let before = registries.index_state(&registry_id).unwrap().current_index;

        let wrong = BTreeMap::from([("nickname".to_string(), "Al".to_string())]);
        let err = issuer.issue_credential(&cd.id, &wrong).unwrap_err();
        assert!(matches!(err, EngineError::MissingCredentialValue(ref a) if a == "name"));
        let err = issuer.issue_credential(&cd.id, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::MissingCredentialValue(_)));

        assert_eq!(
            registries.index_state(&registry_id).unwrap().current_index,
            before
        );
        let next = issuer.issue_credential(&cd.id, &values()).unwrap();
        assert_eq!(next.index, Some(before + 1));
    }

    #[test]
    fn test_gives_up_while_registry_pending() {
        let (ctx, registrar) = context();
        let cd = revocable_cred_def(&ctx);
        registrar.set_mode(RegistrarMode::Wait);
        let err = Issuer::new(ctx).issue_credential(&cd.id, &values()).unwrap_err();
        assert!(matches!(err, EngineError::NoActiveRegistry(_)));
    }
}

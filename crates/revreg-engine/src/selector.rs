use crate::context::EngineContext;
use crate::cred_def::CredDefManager;
use crate::error::EngineResult;
use crate::lifecycle;
use crate::registry::{new_registry_tag, RegistryManager};
use revreg_core::{CredDefId, RegistryDefinition, RegistryState};

/// Chooses the registry new issuances go to.
#[derive(Clone)]
pub struct ActiveRegistrySelector {
    ctx: EngineContext,
    cred_defs: CredDefManager,
    registries: RegistryManager,
}

impl ActiveRegistrySelector {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            cred_defs: CredDefManager::new(ctx.clone()),
            registries: RegistryManager::new(ctx.clone()),
            ctx,
        }
    }

    /// The oldest `active` registry of `cred_def_id`.
    ///
    /// `None` means "not ready yet, retry later": either a registry is still
    /// being registered, or none existed and one has just been created.
    ///
    /// A `posted` registry with no stored status list had its publication
    /// fail after the definition committed; publication is retried here and
    /// the registry is returned once it becomes active.
    pub fn get_active_registry(
        &self,
        cred_def_id: &CredDefId,
    ) -> EngineResult<Option<RegistryDefinition>> {
        let active = self
            .registries
            .list_registries(Some(cred_def_id), Some(RegistryState::Active))?;
        if let Some(oldest) = active.into_iter().next() {
            tracing::debug!(cred_def_id = %cred_def_id, registry_id = %oldest.id, "active registry selected");
            return Ok(Some(oldest));
        }

        let mut preparing = 0;
        for def in self.registries.list_registries(Some(cred_def_id), None)? {
            if def.state == RegistryState::Posted && !self.registries.has_status_list(&def.id)? {
                match self.registries.publish_status_list(&def.id) {
                    Ok(published) if published.state == RegistryState::Active => {
                        tracing::info!(
                            cred_def_id = %cred_def_id,
                            registry_id = %published.id,
                            "status list published on retry"
                        );
                        return Ok(Some(published));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(
                        registry_id = %def.id,
                        error = %e,
                        "status list publication retry failed"
                    ),
                }
            }
            if lifecycle::is_in_preparation(def.state) {
                preparing += 1;
            }
        }
        if preparing > 0 {
            tracing::debug!(cred_def_id = %cred_def_id, preparing, "registry still being prepared");
            return Ok(None);
        }

        let cred_def = self.cred_defs.get(cred_def_id)?;
        let created = self.registries.create_registry(
            &cred_def.issuer_id,
            cred_def_id,
            self.ctx.config.default_capacity,
            self.ctx.config.registry_type,
            &new_registry_tag(),
        )?;
        tracing::info!(
            cred_def_id = %cred_def_id,
            registry_id = %created.id,
            "no usable registry, created a new one"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::test_support::{context, revocable_cred_def};
    use revreg_core::{RegistryId, RegistryType};
    use revreg_registrar::RegistrarMode;

    #[test]
    fn test_prefers_oldest_active() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let registries = RegistryManager::new(ctx.clone());
        let a = registries
            .create_registry(&cd.issuer_id, &cd.id, 4, RegistryType::ClAccum, "a")
            .unwrap();
        let b = registries
            .create_registry(&cd.issuer_id, &cd.id, 4, RegistryType::ClAccum, "b")
            .unwrap();
        assert_ne!(a.id, b.id);

        let selector = ActiveRegistrySelector::new(ctx);
        assert_eq!(selector.get_active_registry(&cd.id).unwrap().unwrap().id, a.id);

        registries.set_registry_state(&a.id, RegistryState::Full).unwrap();
        assert_eq!(selector.get_active_registry(&cd.id).unwrap().unwrap().id, b.id);
    }

    #[test]
    fn test_creates_registry_when_none_exist() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let selector = ActiveRegistrySelector::new(ctx.clone());

        assert!(selector.get_active_registry(&cd.id).unwrap().is_none());
        let created = RegistryManager::new(ctx.clone())
            .list_registries(Some(&cd.id), None)
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].max_cred_num, ctx.config.default_capacity);

        assert_eq!(
            selector.get_active_registry(&cd.id).unwrap().unwrap().id,
            created[0].id
        );
    }

    #[test]
    fn test_none_while_registry_pending() {
        let (ctx, registrar) = context();
        let cd = revocable_cred_def(&ctx);
        registrar.set_mode(RegistrarMode::Wait);
        let selector = ActiveRegistrySelector::new(ctx.clone());

        assert!(selector.get_active_registry(&cd.id).unwrap().is_none());
        assert!(selector.get_active_registry(&cd.id).unwrap().is_none());
        // the pending registry blocks a second creation
        let all = RegistryManager::new(ctx)
            .list_registries(Some(&cd.id), None)
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, RegistryState::Init);
    }

    #[test]
    fn test_recovers_registry_whose_status_list_failed() {
        let (ctx, registrar) = context();
        let cd = revocable_cred_def(&ctx);
        registrar.set_mode(RegistrarMode::Wait);
        let registries = RegistryManager::new(ctx.clone());
        let selector = ActiveRegistrySelector::new(ctx.clone());

        let pending = registries
            .create_registry(&cd.issuer_id, &cd.id, 4, RegistryType::ClAccum, "a")
            .unwrap();
        assert_eq!(pending.state, RegistryState::Init);
        let final_id = RegistryId::new(registrar.complete(pending.id.as_str()).unwrap());

        registrar.set_mode(RegistrarMode::Fail);
        let err = registries
            .finish_registration(pending.id.as_str(), &final_id)
            .unwrap_err();
        assert!(matches!(err, EngineError::RegistrationFailed(_)));
        assert_eq!(registries.get_registry(&final_id).unwrap().state, RegistryState::Posted);
        assert!(!registries.has_status_list(&final_id).unwrap());

        // still failing: the registry stays pending and blocks a new one
        assert!(selector.get_active_registry(&cd.id).unwrap().is_none());
        assert_eq!(registries.list_registries(Some(&cd.id), None).unwrap().len(), 1);

        registrar.set_mode(RegistrarMode::Finish);
        let active = selector.get_active_registry(&cd.id).unwrap().unwrap();
        assert_eq!(active.id, final_id);
        assert_eq!(active.state, RegistryState::Active);
        assert!(registries.has_status_list(&final_id).unwrap());
        assert_eq!(registries.list_registries(Some(&cd.id), None).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_cred_def() {
        let (ctx, _) = context();
        let err = ActiveRegistrySelector::new(ctx)
            .get_active_registry(&CredDefId::new("missing"))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}

//! Registry Definition Manager.
//!
//! Owns every `revocation_reg_def` record. A registry is generated locally,
//! registered with the registrar, and stored together with its index state
//! and private key in one transaction. Publishing the first status list makes
//! it `active`.

use crate::context::EngineContext;
use crate::cred_def::CredDefManager;
use crate::error::{Context, EngineError, EngineResult};
use crate::lifecycle;
use crate::records::{
    decode, encode, fetch_required, registry_key_tags, registry_tags, status_list_tags,
    CATEGORY_REG_DEF, CATEGORY_REG_DEF_PRIVATE, CATEGORY_REG_INFO, CATEGORY_STATUS_LIST,
    TAG_CRED_DEF_ID, TAG_JOB_ID, TAG_STATE,
};
use revreg_core::{
    AnchoredObject, CredDefId, Entry, IssuerId, PrivateKeyMaterial, RegistrationState,
    RegistryDefinition, RegistryId, RegistryIndexState, RegistryState, RegistryType, StatusList,
    TagFilter, Timestamp,
};

#[derive(Clone)]
pub struct RegistryManager {
    ctx: EngineContext,
    cred_defs: CredDefManager,
}

impl RegistryManager {
    pub fn new(ctx: EngineContext) -> Self {
        let cred_defs = CredDefManager::new(ctx.clone());
        Self { ctx, cred_defs }
    }

    // -----------------------------------------------------------------------
    // Creation and registration
    // -----------------------------------------------------------------------

    /// Create, register and persist a new registry.
    ///
    /// With a synchronous registrar the registry comes back `active` (or
    /// `posted` if its status list registration is still pending). With an
    /// asynchronous registrar it comes back `init`, stored under the job id
    /// until [`RegistryManager::finish_registration`].
    pub fn create_registry(
        &self,
        issuer_id: &IssuerId,
        cred_def_id: &CredDefId,
        max_capacity: u32,
        registry_type: RegistryType,
        tag: &str,
    ) -> EngineResult<RegistryDefinition> {
        self.ctx.config.check_size(max_capacity)?;

        let cred_def = self.cred_defs.get(cred_def_id)?;
        if !cred_def.support_revocation {
            return Err(EngineError::RevocationNotSupported(cred_def_id.to_string()));
        }

        let (mut draft, key) = self
            .ctx
            .accumulator
            .create_registry_definition(&cred_def, issuer_id, tag, registry_type, max_capacity)
            .accum_ctx(format!("creating registry definition for {}", cred_def_id))?;
        draft.tails_location = self.ctx.config.tails_location(&draft.tails_hash);

        let result = self
            .ctx
            .registrar
            .register(AnchoredObject::RegistryDefinition(&draft))
            .registrar_ctx(format!("registering registry definition for {}", cred_def_id))?;

        let (record_id, state) = match result.state {
            RegistrationState::Finished => {
                let id = result.id.ok_or_else(|| {
                    EngineError::Registrar("finished registration without an id".into())
                })?;
                (id, RegistryState::Posted)
            }
            RegistrationState::Wait => {
                let job_id = result.job_id.ok_or_else(|| {
                    EngineError::Registrar("pending registration without a job id".into())
                })?;
                (job_id, RegistryState::Init)
            }
            RegistrationState::Failed => {
                return Err(EngineError::RegistrationFailed(
                    result
                        .reason
                        .unwrap_or_else(|| "registry definition rejected".into()),
                ));
            }
        };

        let def = RegistryDefinition::from_draft(draft, RegistryId::new(record_id), state);
        let index_state = RegistryIndexState::new(def.max_cred_num);

        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        insert_registry_records(txn.as_mut(), &def, &index_state, &key)?;
        txn.commit()
            .store_ctx(format!("committing registry {}", def.id))?;

        tracing::info!(
            registry_id = %def.id,
            cred_def_id = %def.cred_def_id,
            capacity = def.max_cred_num,
            state = %def.state,
            "registry created"
        );

        match def.state {
            RegistryState::Posted => self.publish_status_list(&def.id),
            _ => Ok(def),
        }
    }

    /// Move a registry stored under `job_id` to its final identifier and
    /// publish its first status list.
    pub fn finish_registration(
        &self,
        job_id: &str,
        registry_id: &RegistryId,
    ) -> EngineResult<RegistryDefinition> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let (mut def, _): (RegistryDefinition, _) =
            fetch_required(txn.as_mut(), CATEGORY_REG_DEF, job_id, true, "registry")?;
        let (index_state, _): (RegistryIndexState, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_REG_INFO,
            job_id,
            true,
            "registry index state",
        )?;
        let (key, _): (PrivateKeyMaterial, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_REG_DEF_PRIVATE,
            job_id,
            true,
            "registry key",
        )?;

        def.state = lifecycle::transition(def.state, RegistryState::Posted)?;
        def.id = registry_id.clone();

        insert_registry_records(txn.as_mut(), &def, &index_state, &key)?;
        for category in [CATEGORY_REG_DEF, CATEGORY_REG_INFO, CATEGORY_REG_DEF_PRIVATE] {
            txn.remove(category, job_id)
                .store_ctx(format!("removing pending {} {}", category, job_id))?;
        }
        txn.commit()
            .store_ctx(format!("committing registry {}", registry_id))?;

        tracing::info!(job_id, registry_id = %registry_id, "registry registration finished");
        self.publish_status_list(registry_id)
    }

    // -----------------------------------------------------------------------
    // Status list publication
    // -----------------------------------------------------------------------

    /// Create, register and store the first status list of a `posted`
    /// registry, moving it to `active` once the list is anchored.
    pub fn publish_status_list(&self, registry_id: &RegistryId) -> EngineResult<RegistryDefinition> {
        let def = self.get_registry(registry_id)?;
        if self.status_list_entry(registry_id)?.is_some() {
            tracing::debug!(registry_id = %registry_id, "status list already published");
            return Ok(def);
        }
        lifecycle::transition(def.state, RegistryState::Active)?;

        let mut list = self
            .ctx
            .accumulator
            .create_status_list(registry_id, &def, &def.issuer_id)
            .accum_ctx(format!("creating status list for {}", registry_id))?;
        list.timestamp = Some(Timestamp::now().seconds_since_epoch);

        let result = self
            .ctx
            .registrar
            .register(AnchoredObject::StatusList(&list))
            .registrar_ctx(format!("registering status list for {}", registry_id))?;

        let job_id = match result.state {
            RegistrationState::Finished => None,
            RegistrationState::Wait => Some(result.job_id.ok_or_else(|| {
                EngineError::Registrar("pending registration without a job id".into())
            })?),
            RegistrationState::Failed => {
                return Err(EngineError::RegistrationFailed(
                    result.reason.unwrap_or_else(|| "status list rejected".into()),
                ));
            }
        };

        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        txn.insert(
            CATEGORY_STATUS_LIST,
            registry_id.as_str(),
            &encode(&list)?,
            &status_list_tags(registry_id.as_str(), result.state, job_id.as_deref()),
        )
        .store_ctx(format!("storing status list {}", registry_id))?;

        let def = if job_id.is_none() {
            update_state(txn.as_mut(), registry_id, RegistryState::Active)?
        } else {
            def
        };
        txn.commit()
            .store_ctx(format!("committing status list {}", registry_id))?;

        tracing::info!(
            registry_id = %registry_id,
            state = %def.state,
            pending = job_id.is_some(),
            "status list published"
        );
        Ok(def)
    }

    /// Mark a pending status list registration as finished and activate the
    /// registry.
    pub fn finish_status_list(&self, registry_id: &RegistryId) -> EngineResult<RegistryDefinition> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let (list, entry): (StatusList, Entry) = fetch_required(
            txn.as_mut(),
            CATEGORY_STATUS_LIST,
            registry_id.as_str(),
            true,
            "status list",
        )?;

        if entry.tags.get(TAG_STATE).map(String::as_str)
            != Some(RegistrationState::Wait.as_str())
        {
            tracing::debug!(registry_id = %registry_id, "status list not pending");
            drop(txn);
            return self.get_registry(registry_id);
        }

        txn.replace(
            CATEGORY_STATUS_LIST,
            registry_id.as_str(),
            &encode(&list)?,
            &status_list_tags(registry_id.as_str(), RegistrationState::Finished, None),
        )
        .store_ctx(format!("updating status list {}", registry_id))?;
        let def = update_state(txn.as_mut(), registry_id, RegistryState::Active)?;
        txn.commit()
            .store_ctx(format!("committing status list {}", registry_id))?;

        tracing::info!(
            registry_id = %registry_id,
            job_id = entry.tags.get(TAG_JOB_ID).map(String::as_str).unwrap_or(""),
            "status list registration finished"
        );
        Ok(def)
    }

    // -----------------------------------------------------------------------
    // State changes
    // -----------------------------------------------------------------------

    pub fn set_registry_state(
        &self,
        registry_id: &RegistryId,
        state: RegistryState,
    ) -> EngineResult<RegistryDefinition> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let def = update_state(txn.as_mut(), registry_id, state)?;
        txn.commit()
            .store_ctx(format!("committing registry {}", registry_id))?;
        tracing::info!(registry_id = %registry_id, state = %state, "registry state changed");
        Ok(def)
    }

    /// Mark a registry full and create its successor.
    ///
    /// Returns the successor, or `None` if the registry was already full.
    pub fn mark_full(&self, registry_id: &RegistryId) -> EngineResult<Option<RegistryDefinition>> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let (current, _): (RegistryDefinition, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_REG_DEF,
            registry_id.as_str(),
            true,
            "registry",
        )?;
        if current.state == RegistryState::Full {
            tracing::debug!(registry_id = %registry_id, "registry already full");
            return Ok(None);
        }
        let def = update_state(txn.as_mut(), registry_id, RegistryState::Full)?;
        txn.commit()
            .store_ctx(format!("committing registry {}", registry_id))?;
        tracing::info!(registry_id = %registry_id, "registry full");

        let successor = self.create_registry(
            &def.issuer_id,
            &def.cred_def_id,
            def.max_cred_num,
            def.registry_type,
            &new_registry_tag(),
        )?;
        tracing::info!(
            registry_id = %registry_id,
            successor = %successor.id,
            "successor registry created"
        );
        Ok(Some(successor))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_registry(&self, registry_id: &RegistryId) -> EngineResult<RegistryDefinition> {
        let entry = self
            .ctx
            .store
            .fetch(CATEGORY_REG_DEF, registry_id.as_str())
            .store_ctx(format!("fetching registry {}", registry_id))?
            .ok_or_else(|| EngineError::not_found("registry", registry_id))?;
        decode(&entry)
    }

    /// Registries matching the given owner and state, oldest first.
    pub fn list_registries(
        &self,
        cred_def_id: Option<&CredDefId>,
        state: Option<RegistryState>,
    ) -> EngineResult<Vec<RegistryDefinition>> {
        let mut filter = TagFilter::new();
        if let Some(cred_def_id) = cred_def_id {
            filter = filter.eq(TAG_CRED_DEF_ID, cred_def_id.as_str());
        }
        if let Some(state) = state {
            filter = filter.eq(TAG_STATE, state.as_str());
        }
        let entries = self
            .ctx
            .store
            .fetch_all(CATEGORY_REG_DEF, &filter)
            .store_ctx("listing registries")?;

        let mut defs = entries
            .iter()
            .map(|entry| decode::<RegistryDefinition>(entry).map(|def| (def, entry.seq)))
            .collect::<EngineResult<Vec<_>>>()?;
        defs.sort_by(|(a, a_seq), (b, b_seq)| {
            a.created_at.cmp(&b.created_at).then(a_seq.cmp(b_seq))
        });
        Ok(defs.into_iter().map(|(def, _)| def).collect())
    }

    pub fn index_state(&self, registry_id: &RegistryId) -> EngineResult<RegistryIndexState> {
        let entry = self
            .ctx
            .store
            .fetch(CATEGORY_REG_INFO, registry_id.as_str())
            .store_ctx(format!("fetching index state {}", registry_id))?
            .ok_or_else(|| EngineError::not_found("registry index state", registry_id))?;
        decode(&entry)
    }

    pub(crate) fn private_key(&self, registry_id: &RegistryId) -> EngineResult<PrivateKeyMaterial> {
        let entry = self
            .ctx
            .store
            .fetch(CATEGORY_REG_DEF_PRIVATE, registry_id.as_str())
            .store_ctx(format!("fetching registry key {}", registry_id))?
            .ok_or_else(|| EngineError::not_found("registry key", registry_id))?;
        decode(&entry)
    }

    /// Whether a status list, published or pending, is stored for the registry.
    pub fn has_status_list(&self, registry_id: &RegistryId) -> EngineResult<bool> {
        Ok(self.status_list_entry(registry_id)?.is_some())
    }

    fn status_list_entry(&self, registry_id: &RegistryId) -> EngineResult<Option<Entry>> {
        self.ctx
            .store
            .fetch(CATEGORY_STATUS_LIST, registry_id.as_str())
            .store_ctx(format!("fetching status list {}", registry_id))
    }
}

/// Fresh tag for generated registries.
pub fn new_registry_tag() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn insert_registry_records<S: revreg_core::StoreTransaction + ?Sized>(
    txn: &mut S,
    def: &RegistryDefinition,
    index_state: &RegistryIndexState,
    key: &PrivateKeyMaterial,
) -> EngineResult<()> {
    let name = def.id.as_str();
    txn.insert(CATEGORY_REG_DEF, name, &encode(def)?, &registry_tags(def))
        .store_ctx(format!("storing registry {}", name))?;
    txn.insert(
        CATEGORY_REG_INFO,
        name,
        &encode(index_state)?,
        &registry_key_tags(name),
    )
    .store_ctx(format!("storing index state {}", name))?;
    txn.insert(
        CATEGORY_REG_DEF_PRIVATE,
        name,
        &encode(key)?,
        &registry_key_tags(name),
    )
    .store_ctx(format!("storing registry key {}", name))?;
    Ok(())
}

/// Validate and apply a state transition inside an open transaction.
fn update_state<S: revreg_core::StoreTransaction + ?Sized>(
    txn: &mut S,
    registry_id: &RegistryId,
    to: RegistryState,
) -> EngineResult<RegistryDefinition> {
    let (mut def, _): (RegistryDefinition, _) = fetch_required(
        txn,
        CATEGORY_REG_DEF,
        registry_id.as_str(),
        true,
        "registry",
    )?;
    def.state = lifecycle::transition(def.state, to)?;
    txn.replace(
        CATEGORY_REG_DEF,
        registry_id.as_str(),
        &encode(&def)?,
        &registry_tags(&def),
    )
    .store_ctx(format!("updating registry {}", registry_id))?;
    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, context_with_mode, revocable_cred_def};
    use revreg_registrar::RegistrarMode;

    #[test]
    fn test_create_registry_becomes_active() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let manager = RegistryManager::new(ctx.clone());

        let def = manager
            .create_registry(&cd.issuer_id, &cd.id, 5, RegistryType::ClAccum, "0")
            .unwrap();
        assert_eq!(def.state, RegistryState::Active);
        assert_eq!(def.max_cred_num, 5);
        assert_eq!(def.tails_location, format!("tails/{}", def.tails_hash));
        assert_eq!(manager.get_registry(&def.id).unwrap().tails_location, def.tails_location);

        let state = manager.index_state(&def.id).unwrap();
        assert_eq!(state, RegistryIndexState::new(5));
        assert!(ctx
            .store
            .fetch(CATEGORY_STATUS_LIST, def.id.as_str())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_bad_size_rejected_before_any_work() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let manager = RegistryManager::new(ctx.clone());
        for size in [0, 3, 32769] {
            let err = manager
                .create_registry(&cd.issuer_id, &cd.id, size, RegistryType::ClAccum, "0")
                .unwrap_err();
            assert!(matches!(err, EngineError::BadRegistrySize { .. }));
        }
        assert!(manager.list_registries(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_revocation_not_supported() {
        let (ctx, _) = context();
        let cd = CredDefManager::new(ctx.clone())
            .register_credential_definition(
                &IssuerId::new("did:sov:issuer"),
                &revreg_core::SchemaId::new("schema"),
                &["name"],
                "plain",
                false,
            )
            .unwrap();
        let err = RegistryManager::new(ctx)
            .create_registry(&cd.issuer_id, &cd.id, 10, RegistryType::ClAccum, "0")
            .unwrap_err();
        assert!(matches!(err, EngineError::RevocationNotSupported(_)));
    }

    #[test]
    fn test_async_registration_rekeys_atomically() {
        let (ctx, registrar) = context();
        let cd = revocable_cred_def(&ctx);
        registrar.set_mode(RegistrarMode::Wait);
        let manager = RegistryManager::new(ctx.clone());

        let pending = manager
            .create_registry(&cd.issuer_id, &cd.id, 8, RegistryType::ClAccum, "a")
            .unwrap();
        assert_eq!(pending.state, RegistryState::Init);
        let job_id = pending.id.to_string();

        let final_id = RegistryId::new(registrar.complete(&job_id).unwrap());
        registrar.set_mode(RegistrarMode::Finish);
        let def = manager.finish_registration(&job_id, &final_id).unwrap();
        assert_eq!(def.id, final_id);
        assert_eq!(def.state, RegistryState::Active);

        for category in [CATEGORY_REG_DEF, CATEGORY_REG_INFO, CATEGORY_REG_DEF_PRIVATE] {
            assert!(ctx.store.fetch(category, &job_id).unwrap().is_none());
            assert!(ctx.store.fetch(category, final_id.as_str()).unwrap().is_some());
        }
        assert_eq!(manager.list_registries(Some(&cd.id), None).unwrap().len(), 1);
    }

    #[test]
    fn test_pending_status_list_keeps_registry_posted() {
        let (ctx, registrar) = context();
        let cd = revocable_cred_def(&ctx);
        let manager = RegistryManager::new(ctx.clone());

        registrar.set_mode(RegistrarMode::Wait);
        let pending = manager
            .create_registry(&cd.issuer_id, &cd.id, 8, RegistryType::ClAccum, "b")
            .unwrap();
        let final_id = RegistryId::new(registrar.complete(pending.id.as_str()).unwrap());

        // the registry id is final, the status list registration stays pending
        let def = manager.finish_registration(pending.id.as_str(), &final_id).unwrap();
        assert_eq!(def.state, RegistryState::Posted);

        let def = manager.finish_status_list(&final_id).unwrap();
        assert_eq!(def.state, RegistryState::Active);
    }

    #[test]
    fn test_failed_registration_persists_nothing() {
        let (ctx, registrar) = context_with_mode(RegistrarMode::Finish);
        let cd = revocable_cred_def(&ctx);
        registrar.set_mode(RegistrarMode::Fail);
        let manager = RegistryManager::new(ctx.clone());
        let err = manager
            .create_registry(&cd.issuer_id, &cd.id, 8, RegistryType::ClAccum, "c")
            .unwrap_err();
        assert!(matches!(err, EngineError::RegistrationFailed(_)));
        assert!(manager.list_registries(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_mark_full_is_idempotent() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let manager = RegistryManager::new(ctx.clone());
        let def = manager
            .create_registry(&cd.issuer_id, &cd.id, 4, RegistryType::ClAccum, "0")
            .unwrap();

        let successor = manager.mark_full(&def.id).unwrap().unwrap();
        assert_ne!(successor.id, def.id);
        assert_eq!(successor.max_cred_num, 4);
        assert_eq!(successor.state, RegistryState::Active);
        assert_eq!(manager.get_registry(&def.id).unwrap().state, RegistryState::Full);

        assert!(manager.mark_full(&def.id).unwrap().is_none());
        assert_eq!(manager.list_registries(Some(&cd.id), None).unwrap().len(), 2);
    }

    #[test]
    fn test_set_registry_state_rejects_invalid() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let manager = RegistryManager::new(ctx);
        let def = manager
            .create_registry(&cd.issuer_id, &cd.id, 4, RegistryType::ClAccum, "0")
            .unwrap();
        let def = manager
            .set_registry_state(&def.id, RegistryState::Decommissioned)
            .unwrap();
        assert_eq!(def.state, RegistryState::Decommissioned);
        let err = manager
            .set_registry_state(&def.id, RegistryState::Active)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}

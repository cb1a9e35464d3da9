use crate::context::EngineContext;
use crate::error::{Context, EngineError, EngineResult};
use crate::records::{
    cred_def_tags, decode, encode, fetch_required, CATEGORY_CRED_DEF,
    CATEGORY_CRED_DEF_PRIVATE, TAG_ISSUER_ID,
};
use revreg_core::{
    AnchoredObject, CredDefId, CredentialDefinition, IssuerId, PrivateKeyMaterial,
    RegistrationState, SchemaId, TagFilter, Tags,
};
use std::collections::BTreeSet;

/// Creates, registers and looks up credential definitions.
#[derive(Clone)]
pub struct CredDefManager {
    ctx: EngineContext,
}

impl CredDefManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// `attr_names` are the schema's attributes; issuance requires a value
    /// for each of them.
    pub fn register_credential_definition(
        &self,
        issuer_id: &IssuerId,
        schema_id: &SchemaId,
        attr_names: &[&str],
        tag: &str,
        support_revocation: bool,
    ) -> EngineResult<CredentialDefinition> {
        let attr_names: BTreeSet<String> = attr_names.iter().map(|name| name.to_string()).collect();
        let (draft, key) = self
            .ctx
            .accumulator
            .create_credential_definition(issuer_id, schema_id, &attr_names, tag, support_revocation)
            .accum_ctx("creating credential definition")?;

        let result = self
            .ctx
            .registrar
            .register(AnchoredObject::CredentialDefinition(&draft))
            .registrar_ctx("registering credential definition")?;

        let (record_id, state) = match result.state {
            RegistrationState::Finished => {
                let id = result.id.ok_or_else(|| {
                    EngineError::Registrar("finished registration without an id".into())
                })?;
                (id, RegistrationState::Finished)
            }
            RegistrationState::Wait => {
                let job_id = result.job_id.ok_or_else(|| {
                    EngineError::Registrar("pending registration without a job id".into())
                })?;
                (job_id, RegistrationState::Wait)
            }
            RegistrationState::Failed => {
                return Err(EngineError::RegistrationFailed(
                    result
                        .reason
                        .unwrap_or_else(|| "credential definition rejected".into()),
                ));
            }
        };

        let def = CredentialDefinition::from_draft(draft, CredDefId::new(record_id), state);
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        txn.insert(
            CATEGORY_CRED_DEF,
            def.id.as_str(),
            &encode(&def)?,
            &cred_def_tags(&def),
        )
        .store_ctx(format!("storing credential definition {}", def.id))?;
        txn.insert(
            CATEGORY_CRED_DEF_PRIVATE,
            def.id.as_str(),
            &encode(&key)?,
            &Tags::new(),
        )
        .store_ctx(format!("storing credential definition key {}", def.id))?;
        txn.commit().store_ctx("committing credential definition")?;

        tracing::info!(
            cred_def_id = %def.id,
            state = %def.state,
            support_revocation,
            "credential definition registered"
        );
        Ok(def)
    }

    /// Re-key a pending definition from its job id to the final id.
    pub fn finish_credential_definition(
        &self,
        job_id: &str,
        cred_def_id: &CredDefId,
    ) -> EngineResult<CredentialDefinition> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let (mut def, _): (CredentialDefinition, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_CRED_DEF,
            job_id,
            true,
            "credential definition",
        )?;
        let (key, _): (PrivateKeyMaterial, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_CRED_DEF_PRIVATE,
            job_id,
            true,
            "credential definition key",
        )?;

        def.id = cred_def_id.clone();
        def.state = RegistrationState::Finished;
        txn.insert(
            CATEGORY_CRED_DEF,
            def.id.as_str(),
            &encode(&def)?,
            &cred_def_tags(&def),
        )
        .store_ctx(format!("storing credential definition {}", def.id))?;
        txn.insert(
            CATEGORY_CRED_DEF_PRIVATE,
            def.id.as_str(),
            &encode(&key)?,
            &Tags::new(),
        )
        .store_ctx(format!("storing credential definition key {}", def.id))?;
        txn.remove(CATEGORY_CRED_DEF, job_id)
            .store_ctx(format!("removing pending credential definition {}", job_id))?;
        txn.remove(CATEGORY_CRED_DEF_PRIVATE, job_id)
            .store_ctx(format!("removing pending credential definition key {}", job_id))?;
        txn.commit().store_ctx("committing credential definition")?;

        tracing::info!(job_id, cred_def_id = %def.id, "credential definition finished");
        Ok(def)
    }

    pub fn get(&self, cred_def_id: &CredDefId) -> EngineResult<CredentialDefinition> {
        let entry = self
            .ctx
            .store
            .fetch(CATEGORY_CRED_DEF, cred_def_id.as_str())
            .store_ctx(format!("fetching credential definition {}", cred_def_id))?
            .ok_or_else(|| EngineError::not_found("credential definition", cred_def_id))?;
        decode(&entry)
    }

    pub(crate) fn private_key(&self, cred_def_id: &CredDefId) -> EngineResult<PrivateKeyMaterial> {
        let entry = self
            .ctx
            .store
            .fetch(CATEGORY_CRED_DEF_PRIVATE, cred_def_id.as_str())
            .store_ctx(format!("fetching credential definition key {}", cred_def_id))?
            .ok_or_else(|| EngineError::not_found("credential definition key", cred_def_id))?;
        decode(&entry)
    }

    pub fn supports_revocation(&self, cred_def_id: &CredDefId) -> EngineResult<bool> {
        Ok(self.get(cred_def_id)?.support_revocation)
    }

    pub fn list(&self, issuer_id: Option<&IssuerId>) -> EngineResult<Vec<CredentialDefinition>> {
        let filter = match issuer_id {
            Some(issuer) => TagFilter::new().eq(TAG_ISSUER_ID, issuer.as_str()),
            None => TagFilter::new(),
        };
        self.ctx
            .store
            .fetch_all(CATEGORY_CRED_DEF, &filter)
            .store_ctx("listing credential definitions")?
            .iter()
            .map(decode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use revreg_registrar::RegistrarMode;

    #[test]
    fn test_register_and_lookup() {
        let (ctx, _) = context();
        let manager = CredDefManager::new(ctx);
        let issuer = IssuerId::new("did:sov:issuer");
        let def = manager
            .register_credential_definition(&issuer, &SchemaId::new("s1"), &["name"], "default", true)
            .unwrap();
        assert_eq!(def.id.as_str(), "did:sov:issuer:3:CL:s1:default");
        assert_eq!(def.state, RegistrationState::Finished);
        assert!(def.attr_names.contains("name"));
        assert!(manager.supports_revocation(&def.id).unwrap());
        assert!(manager.private_key(&def.id).is_ok());
        assert_eq!(manager.list(Some(&issuer)).unwrap().len(), 1);
        assert!(manager
            .list(Some(&IssuerId::new("did:sov:other")))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pending_definition_is_rekeyed() {
        let (ctx, registrar) = context();
        registrar.set_mode(RegistrarMode::Wait);
        let manager = CredDefManager::new(ctx);
        let pending = manager
            .register_credential_definition(
                &IssuerId::new("did:sov:issuer"),
                &SchemaId::new("s1"),
                &["name"],
                "default",
                false,
            )
            .unwrap();
        assert_eq!(pending.state, RegistrationState::Wait);

        let final_id = CredDefId::new(registrar.complete(pending.id.as_str()).unwrap());
        let def = manager
            .finish_credential_definition(pending.id.as_str(), &final_id)
            .unwrap();
        assert_eq!(def.state, RegistrationState::Finished);
        assert!(matches!(
            manager.get(&pending.id),
            Err(EngineError::NotFound { .. })
        ));
        assert!(!manager.supports_revocation(&final_id).unwrap());
    }

    #[test]
    fn test_rejected_definition_not_stored() {
        let (ctx, registrar) = context();
        registrar.set_mode(RegistrarMode::Fail);
        let manager = CredDefManager::new(ctx);
        let err = manager
            .register_credential_definition(
                &IssuerId::new("did:sov:issuer"),
                &SchemaId::new("s1"),
                &["name"],
                "default",
                true,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::RegistrationFailed(_)));
        assert!(manager.list(None).unwrap().is_empty());
    }
}

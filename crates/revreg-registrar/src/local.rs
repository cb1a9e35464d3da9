use crate::error::{RegistrarError, RegistrarResult};
use revreg_core::{
    AnchoredObject, IssuerId, RegistrationResult, Registrar, RevRegResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock};

/// How a [`LocalRegistrar`] answers registrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrarMode {
    /// Anchor immediately and return the final id.
    #[default]
    Finish,
    /// Accept, return a job id, and anchor on [`LocalRegistrar::complete`].
    Wait,
    /// Reject every registration.
    Fail,
}

/// Registrar anchoring objects for issuers under one DID method prefix.
///
/// Identifiers follow the ledger layout used by legacy CL registries:
/// `{issuer}:3:CL:{schema}:{tag}` for credential definitions and
/// `{issuer}:4:{cred_def}:CL_ACCUM:{tag}` for registry definitions.
pub struct LocalRegistrar {
    name: String,
    method_prefix: String,
    mode: RwLock<RegistrarMode>,
    /// job id -> final id
    pending: Mutex<BTreeMap<String, String>>,
}

impl LocalRegistrar {
    pub fn new(name: impl Into<String>, method_prefix: impl Into<String>, mode: RegistrarMode) -> Self {
        Self {
            name: name.into(),
            method_prefix: method_prefix.into(),
            mode: RwLock::new(mode),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn mode(&self) -> RegistrarMode {
        self.mode.read().map(|m| *m).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: RegistrarMode) {
        if let Ok(mut current) = self.mode.write() {
            *current = mode;
        }
    }

    /// Finish a pending job, returning the final identifier.
    pub fn complete(&self, job_id: &str) -> RegistrarResult<String> {
        let final_id = self
            .lock_pending()?
            .remove(job_id)
            .ok_or_else(|| RegistrarError::UnknownJob(job_id.to_string()))?;
        tracing::info!(registrar = %self.name, job_id, final_id = %final_id, "registration completed");
        Ok(final_id)
    }

    /// Pending job ids with the identifier each will receive.
    pub fn pending_jobs(&self) -> Vec<(String, String)> {
        self.lock_pending()
            .map(|p| p.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn lock_pending(&self) -> RegistrarResult<MutexGuard<'_, BTreeMap<String, String>>> {
        self.pending
            .lock()
            .map_err(|e| RegistrarError::LockPoisoned(e.to_string()))
    }

    fn final_id(object: &AnchoredObject<'_>) -> String {
        match object {
            AnchoredObject::CredentialDefinition(d) => {
                format!("{}:3:CL:{}:{}", d.issuer_id, d.schema_id, d.tag)
            }
            AnchoredObject::RegistryDefinition(d) => format!(
                "{}:4:{}:{}:{}",
                d.issuer_id, d.cred_def_id, d.registry_type, d.tag
            ),
            AnchoredObject::StatusList(l) => {
                let digest = l.accumulator.get(..16).unwrap_or(&l.accumulator);
                format!("{}:list:{}", l.registry_id, digest)
            }
        }
    }
}

impl Registrar for LocalRegistrar {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, issuer_id: &IssuerId) -> bool {
        issuer_id.as_str().starts_with(&self.method_prefix)
    }

    fn register(&self, object: AnchoredObject<'_>) -> RevRegResult<RegistrationResult> {
        let final_id = Self::final_id(&object);
        let result = match self.mode() {
            RegistrarMode::Finish => RegistrationResult::finished(final_id),
            RegistrarMode::Wait => {
                let job_id = uuid::Uuid::new_v4().to_string();
                self.lock_pending()?.insert(job_id.clone(), final_id);
                RegistrationResult::wait(None, job_id)
            }
            RegistrarMode::Fail => {
                RegistrationResult::failed(format!("{} rejected {}", self.name, object.kind()))
            }
        };
        tracing::debug!(
            registrar = %self.name,
            kind = object.kind(),
            state = %result.state,
            "registration submitted"
        );
        Ok(result)
    }
}

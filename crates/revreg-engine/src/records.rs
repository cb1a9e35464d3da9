//! Record categories, tags and codecs used by the engine.

use crate::error::{Context, EngineError, EngineResult};
use revreg_core::{
    CredentialDefinition, Entry, RegistrationState, RegistryDefinition, StoreTransaction, Tags,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const CATEGORY_CRED_DEF: &str = "credential_def";
pub const CATEGORY_CRED_DEF_PRIVATE: &str = "credential_def_private";
pub const CATEGORY_REG_DEF: &str = "revocation_reg_def";
pub const CATEGORY_REG_DEF_PRIVATE: &str = "revocation_reg_def_private";
pub const CATEGORY_REG_INFO: &str = "revocation_reg_info";
pub const CATEGORY_STATUS_LIST: &str = "revocation_list";
pub const CATEGORY_PENDING: &str = "revocation_pending";

pub const TAG_STATE: &str = "state";
pub const TAG_CRED_DEF_ID: &str = "cred_def_id";
pub const TAG_ISSUER_ID: &str = "issuer_id";
pub const TAG_SCHEMA_ID: &str = "schema_id";
pub const TAG_JOB_ID: &str = "job_id";
pub const TAG_REG_DEF_ID: &str = "rev_reg_def_id";
pub const TAG_SUPPORT_REVOCATION: &str = "support_revocation";

pub(crate) fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(entry: &Entry) -> EngineResult<T> {
    entry.value_json().map_err(|e| EngineError::Serialization(e.to_string()))
}

pub(crate) fn registry_tags(def: &RegistryDefinition) -> Tags {
    let mut tags = Tags::new();
    tags.insert(TAG_CRED_DEF_ID.into(), def.cred_def_id.to_string());
    tags.insert(TAG_ISSUER_ID.into(), def.issuer_id.to_string());
    tags.insert(TAG_STATE.into(), def.state.to_string());
    tags
}

pub(crate) fn cred_def_tags(def: &CredentialDefinition) -> Tags {
    let mut tags = Tags::new();
    tags.insert(TAG_ISSUER_ID.into(), def.issuer_id.to_string());
    tags.insert(TAG_SCHEMA_ID.into(), def.schema_id.to_string());
    tags.insert(TAG_STATE.into(), def.state.to_string());
    tags.insert(
        TAG_SUPPORT_REVOCATION.into(),
        def.support_revocation.to_string(),
    );
    tags
}

pub(crate) fn status_list_tags(
    registry_id: &str,
    state: RegistrationState,
    job_id: Option<&str>,
) -> Tags {
    let mut tags = Tags::new();
    tags.insert(TAG_REG_DEF_ID.into(), registry_id.to_string());
    tags.insert(TAG_STATE.into(), state.to_string());
    if let Some(job_id) = job_id {
        tags.insert(TAG_JOB_ID.into(), job_id.to_string());
    }
    tags
}

pub(crate) fn registry_key_tags(registry_id: &str) -> Tags {
    let mut tags = Tags::new();
    tags.insert(TAG_REG_DEF_ID.into(), registry_id.to_string());
    tags
}

/// Fetch and decode a record inside a transaction, failing if it is missing.
pub(crate) fn fetch_required<T: DeserializeOwned, S: StoreTransaction + ?Sized>(
    txn: &mut S,
    category: &str,
    name: &str,
    for_update: bool,
    kind: &'static str,
) -> EngineResult<(T, Entry)> {
    let entry = txn
        .fetch(category, name, for_update)
        .store_ctx(format!("fetching {} {}", kind, name))?
        .ok_or_else(|| EngineError::not_found(kind, name))?;
    Ok((decode(&entry)?, entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use revreg_core::{
        CredDefId, IssuerId, RegistryId, RegistryState, RegistryType, Timestamp,
    };

    #[test]
    fn test_registry_tags_follow_state() {
        let def = RegistryDefinition {
            id: RegistryId::new("reg-1"),
            issuer_id: IssuerId::new("did:sov:issuer"),
            cred_def_id: CredDefId::new("cd-1"),
            registry_type: RegistryType::ClAccum,
            tag: "0".into(),
            max_cred_num: 5,
            public_key: "pk".into(),
            tails_location: "tails/th".into(),
            tails_hash: "th".into(),
            state: RegistryState::Full,
            created_at: Timestamp::from_seconds(1),
        };
        let tags = registry_tags(&def);
        assert_eq!(tags.get(TAG_STATE).map(String::as_str), Some("full"));
        assert_eq!(tags.get(TAG_CRED_DEF_ID).map(String::as_str), Some("cd-1"));
    }

    #[test]
    fn test_status_list_tags_job_id() {
        let tags = status_list_tags("reg-1", RegistrationState::Wait, Some("job-9"));
        assert_eq!(tags.get(TAG_STATE).map(String::as_str), Some("wait"));
        assert_eq!(tags.get(TAG_JOB_ID).map(String::as_str), Some("job-9"));
        let tags = status_list_tags("reg-1", RegistrationState::Finished, None);
        assert!(!tags.contains_key(TAG_JOB_ID));
    }
}

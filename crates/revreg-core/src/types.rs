use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

// ---------------------------------------------------------------------------
// Timestamp — canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_since_epoch: now.timestamp() as u64,
            nanoseconds: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(IssuerId, "Identifier of the issuing party (usually a DID).");
define_id!(SchemaId, "Identifier of the schema a credential definition is bound to.");
define_id!(CredDefId, "Identifier of a credential definition.");
define_id!(
    RegistryId,
    "Identifier of a revocation registry definition, or the registrar job id while registration is pending."
);

// ---------------------------------------------------------------------------
// RegistryType — accumulator flavour of a revocation registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryType {
    #[default]
    #[serde(rename = "CL_ACCUM")]
    ClAccum,
}

impl RegistryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::ClAccum => "CL_ACCUM",
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CL_ACCUM" => Ok(RegistryType::ClAccum),
            other => Err(format!("unknown registry type: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryState — lifecycle of a revocation registry definition
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`RegistryDefinition`].
///
/// `init` → `posted` → `active` → `full`, with `revoked` and
/// `decommissioned` as terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryState {
    /// Generated locally, remote registration still pending.
    Init,
    /// Registered remotely, first status list not yet published.
    Posted,
    /// Accepting new issuances.
    Active,
    /// Capacity exhausted.
    Full,
    Revoked,
    Decommissioned,
}

impl RegistryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryState::Init => "init",
            RegistryState::Posted => "posted",
            RegistryState::Active => "active",
            RegistryState::Full => "full",
            RegistryState::Revoked => "revoked",
            RegistryState::Decommissioned => "decommissioned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistryState::Revoked | RegistryState::Decommissioned)
    }
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(RegistryState::Init),
            "posted" => Ok(RegistryState::Posted),
            "active" => Ok(RegistryState::Active),
            "full" => Ok(RegistryState::Full),
            "revoked" => Ok(RegistryState::Revoked),
            "decommissioned" => Ok(RegistryState::Decommissioned),
            other => Err(format!("unknown registry state: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote registration results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationState {
    /// Anchored; `id` carries the final identifier.
    Finished,
    /// Accepted but still pending; `job_id` identifies the pending job.
    Wait,
    Failed,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Finished => "finished",
            RegistrationState::Wait => "wait",
            RegistrationState::Failed => "failed",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub state: RegistrationState,
    pub id: Option<String>,
    pub job_id: Option<String>,
    pub reason: Option<String>,
}

impl RegistrationResult {
    pub fn finished(id: impl Into<String>) -> Self {
        Self {
            state: RegistrationState::Finished,
            id: Some(id.into()),
            job_id: None,
            reason: None,
        }
    }

    pub fn wait(id: Option<String>, job_id: impl Into<String>) -> Self {
        Self {
            state: RegistrationState::Wait,
            id,
            job_id: Some(job_id.into()),
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: RegistrationState::Failed,
            id: None,
            job_id: None,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// PrivateKeyMaterial — secret half of a generated definition
// ---------------------------------------------------------------------------

/// Private key material produced by the accumulator adapter.
///
/// Zeroized on drop. Debug output never includes the bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeyMaterial(#[serde(with = "hex_bytes")] pub Vec<u8>);

impl PrivateKeyMaterial {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKeyMaterial([REDACTED; {}])", self.0.len())
    }
}

impl Drop for PrivateKeyMaterial {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Credential definitions
// ---------------------------------------------------------------------------

/// A credential definition as produced by the accumulator adapter, before
/// the registrar has assigned it an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDefinitionDraft {
    pub issuer_id: IssuerId,
    pub schema_id: SchemaId,
    /// Attribute names of the schema; every credential carries a value for each.
    #[serde(default)]
    pub attr_names: BTreeSet<String>,
    pub tag: String,
    pub support_revocation: bool,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDefinition {
    pub id: CredDefId,
    pub issuer_id: IssuerId,
    pub schema_id: SchemaId,
    #[serde(default)]
    pub attr_names: BTreeSet<String>,
    pub tag: String,
    pub support_revocation: bool,
    pub public_key: String,
    pub state: RegistrationState,
    pub created_at: Timestamp,
}

impl CredentialDefinition {
    pub fn from_draft(draft: CredentialDefinitionDraft, id: CredDefId, state: RegistrationState) -> Self {
        Self {
            id,
            issuer_id: draft.issuer_id,
            schema_id: draft.schema_id,
            attr_names: draft.attr_names,
            tag: draft.tag,
            support_revocation: draft.support_revocation,
            public_key: draft.public_key,
            state,
            created_at: Timestamp::now(),
        }
    }

    /// First attribute of the schema with no entry in `values`.
    pub fn missing_attribute(&self, values: &BTreeMap<String, String>) -> Option<&str> {
        self.attr_names
            .iter()
            .find(|name| !values.contains_key(name.as_str()))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Revocation registry definitions
// ---------------------------------------------------------------------------

/// A registry definition generated locally, not yet registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDefinitionDraft {
    pub issuer_id: IssuerId,
    pub cred_def_id: CredDefId,
    pub registry_type: RegistryType,
    pub tag: String,
    pub max_cred_num: u32,
    pub public_key: String,
    pub tails_hash: String,
    /// Where the tails file is published.
    #[serde(default)]
    pub tails_location: String,
}

/// One cryptographic revocation registry instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDefinition {
    pub id: RegistryId,
    pub issuer_id: IssuerId,
    pub cred_def_id: CredDefId,
    pub registry_type: RegistryType,
    pub tag: String,
    pub max_cred_num: u32,
    pub public_key: String,
    pub tails_hash: String,
    #[serde(default)]
    pub tails_location: String,
    pub state: RegistryState,
    pub created_at: Timestamp,
}

impl RegistryDefinition {
    pub fn from_draft(draft: RegistryDefinitionDraft, id: RegistryId, state: RegistryState) -> Self {
        Self {
            id,
            issuer_id: draft.issuer_id,
            cred_def_id: draft.cred_def_id,
            registry_type: draft.registry_type,
            tag: draft.tag,
            max_cred_num: draft.max_cred_num,
            public_key: draft.public_key,
            tails_hash: draft.tails_hash,
            tails_location: draft.tails_location,
            state,
            created_at: Timestamp::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryIndexState — index bookkeeping for one registry
// ---------------------------------------------------------------------------

/// Allocation and revocation bookkeeping for one registry.
///
/// Invariant: `current_index <= max_capacity`. Every mutation bumps
/// `version`, so two snapshots compare equal only if nothing was written in
/// between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryIndexState {
    pub current_index: u32,
    pub max_capacity: u32,
    pub revoked: BTreeSet<u32>,
    pub version: u64,
}

impl RegistryIndexState {
    pub fn new(max_capacity: u32) -> Self {
        Self {
            current_index: 0,
            max_capacity,
            revoked: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_index >= self.max_capacity
    }

    pub fn remaining(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_index)
    }

    /// Whether `index` was issued and has not been revoked yet.
    pub fn can_revoke(&self, index: u32) -> bool {
        index >= 1 && index <= self.current_index && !self.revoked.contains(&index)
    }
}

// ---------------------------------------------------------------------------
// StatusList — accumulator snapshot
// ---------------------------------------------------------------------------

/// Snapshot of which indices of a registry are revoked.
///
/// `revocation_list[i]` is 1 when index `i + 1` is revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusList {
    pub registry_id: RegistryId,
    pub issuer_id: IssuerId,
    pub revocation_list: Vec<u8>,
    pub accumulator: String,
    pub timestamp: Option<u64>,
}

impl StatusList {
    pub fn is_revoked(&self, index: u32) -> bool {
        if index == 0 {
            return false;
        }
        self.revocation_list
            .get(index as usize - 1)
            .map(|bit| *bit == 1)
            .unwrap_or(false)
    }

    pub fn revoked_indices(&self) -> BTreeSet<u32> {
        self.revocation_list
            .iter()
            .enumerate()
            .filter(|(_, bit)| **bit == 1)
            .map(|(i, _)| i as u32 + 1)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// IssuedCredential — output of credential creation
// ---------------------------------------------------------------------------

/// A credential carrying its registry index for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub cred_def_id: CredDefId,
    pub registry_id: Option<RegistryId>,
    pub index: Option<u32>,
    pub values: BTreeMap<String, String>,
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Store records — category/name addressed entries with tags
// ---------------------------------------------------------------------------

pub type Tags = BTreeMap<String, String>;

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub category: String,
    pub name: String,
    pub value: Vec<u8>,
    pub tags: Tags,
    /// Insertion sequence assigned by the store; stable across replace.
    pub seq: u64,
}

impl Entry {
    pub fn value_json<T: serde::de::DeserializeOwned>(&self) -> crate::RevRegResult<T> {
        serde_json::from_slice(&self.value).map_err(|e| {
            crate::RevRegError::Serialization(format!(
                "failed to decode {}/{}: {}",
                self.category, self.name, e
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCondition {
    Eq(String),
    Neq(String),
}

/// Conjunction of tag conditions used by `fetch_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    conditions: Vec<(String, TagCondition)>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push((tag.into(), TagCondition::Eq(value.into())));
        self
    }

    pub fn neq(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push((tag.into(), TagCondition::Neq(value.into())));
        self
    }

    pub fn conditions(&self) -> &[(String, TagCondition)] {
        &self.conditions
    }

    /// A missing tag never satisfies `Eq` and always satisfies `Neq`.
    pub fn matches(&self, tags: &Tags) -> bool {
        self.conditions.iter().all(|(tag, cond)| match cond {
            TagCondition::Eq(v) => tags.get(tag) == Some(v),
            TagCondition::Neq(v) => tags.get(tag) != Some(v),
        })
    }
}

use crate::error::RevRegResult;
use crate::types::{
    CredentialDefinition, CredentialDefinitionDraft, Entry, IssuedCredential, IssuerId,
    PrivateKeyMaterial, RegistrationResult, RegistryDefinition, RegistryDefinitionDraft,
    RegistryId, RegistryType, SchemaId, StatusList, TagFilter, Tags,
};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// RecordStore — category/name addressed records with serializable transactions
//
// Session reads are non-exclusive and only observe committed state. All
// writes go through a transaction; dropping one without committing rolls it
// back.
// ---------------------------------------------------------------------------

pub trait RecordStore: Send + Sync {
    fn fetch(&self, category: &str, name: &str) -> RevRegResult<Option<Entry>>;

    /// Entries of `category` matching `filter`, in insertion order.
    fn fetch_all(&self, category: &str, filter: &TagFilter) -> RevRegResult<Vec<Entry>>;

    /// Open a serializable transaction. Blocks while another transaction on
    /// the same store is open.
    fn transaction(&self) -> RevRegResult<Box<dyn StoreTransaction + '_>>;
}

pub trait StoreTransaction {
    /// Fetch a record. With `for_update` the row is held exclusively until
    /// the transaction ends.
    fn fetch(&mut self, category: &str, name: &str, for_update: bool)
        -> RevRegResult<Option<Entry>>;

    fn fetch_all(&mut self, category: &str, filter: &TagFilter) -> RevRegResult<Vec<Entry>>;

    /// Fails with `DuplicateRecord` if the record exists.
    fn insert(&mut self, category: &str, name: &str, value: &[u8], tags: &Tags)
        -> RevRegResult<()>;

    /// Fails with `RecordNotFound` if the record does not exist.
    fn replace(&mut self, category: &str, name: &str, value: &[u8], tags: &Tags)
        -> RevRegResult<()>;

    /// Fails with `RecordNotFound` if the record does not exist.
    fn remove(&mut self, category: &str, name: &str) -> RevRegResult<()>;

    fn commit(self: Box<Self>) -> RevRegResult<()>;
}

// ---------------------------------------------------------------------------
// AccumulatorLibrary — cryptographic registry / status list / credential ops
//
// Pure functions over their inputs. Implementations must not keep state
// between calls.
// ---------------------------------------------------------------------------

pub trait AccumulatorLibrary: Send + Sync {
    fn create_credential_definition(
        &self,
        issuer_id: &IssuerId,
        schema_id: &SchemaId,
        attr_names: &BTreeSet<String>,
        tag: &str,
        support_revocation: bool,
    ) -> RevRegResult<(CredentialDefinitionDraft, PrivateKeyMaterial)>;

    fn create_registry_definition(
        &self,
        cred_def: &CredentialDefinition,
        issuer_id: &IssuerId,
        tag: &str,
        registry_type: RegistryType,
        capacity: u32,
    ) -> RevRegResult<(RegistryDefinitionDraft, PrivateKeyMaterial)>;

    fn create_status_list(
        &self,
        registry_id: &RegistryId,
        registry_def: &RegistryDefinition,
        issuer_id: &IssuerId,
    ) -> RevRegResult<StatusList>;

    fn update_status_list(
        &self,
        prev: &StatusList,
        timestamp: Option<u64>,
        revoked: &BTreeSet<u32>,
        registry_def: &RegistryDefinition,
    ) -> RevRegResult<StatusList>;

    /// Create credential material. `registry` is present for revocable
    /// definitions and carries the definition and the allocated index.
    fn create_credential(
        &self,
        cred_def: &CredentialDefinition,
        cred_def_key: &PrivateKeyMaterial,
        values: &BTreeMap<String, String>,
        registry: Option<(&RegistryDefinition, &PrivateKeyMaterial, u32)>,
    ) -> RevRegResult<IssuedCredential>;
}

// ---------------------------------------------------------------------------
// Registrar — durable anchoring outside the local store
// ---------------------------------------------------------------------------

/// Object submitted to a [`Registrar`].
#[derive(Debug, Clone)]
pub enum AnchoredObject<'a> {
    CredentialDefinition(&'a CredentialDefinitionDraft),
    RegistryDefinition(&'a RegistryDefinitionDraft),
    StatusList(&'a StatusList),
}

impl AnchoredObject<'_> {
    pub fn issuer_id(&self) -> &IssuerId {
        match self {
            AnchoredObject::CredentialDefinition(d) => &d.issuer_id,
            AnchoredObject::RegistryDefinition(d) => &d.issuer_id,
            AnchoredObject::StatusList(l) => &l.issuer_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnchoredObject::CredentialDefinition(_) => "credential_definition",
            AnchoredObject::RegistryDefinition(_) => "registry_definition",
            AnchoredObject::StatusList(_) => "status_list",
        }
    }
}

pub trait Registrar: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this registrar handles objects owned by `issuer_id`.
    fn supports(&self, issuer_id: &IssuerId) -> bool;

    fn register(&self, object: AnchoredObject<'_>) -> RevRegResult<RegistrationResult>;
}

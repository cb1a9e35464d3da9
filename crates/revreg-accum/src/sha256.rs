//! Hash-based stand-in for the CL accumulator.
//!
//! Secrets are random. Public values are SHA-256 digests over a secret or
//! over other public values, and credentials carry an HMAC-SHA256 tag. The
//! engine gets the same inputs and outputs as from a pairing-based
//! accumulator, so registry bookkeeping can be exercised end to end. It
//! provides no revocation privacy.

use hmac::{Hmac, Mac};
use rand::RngCore;
use revreg_core::{
    AccumulatorLibrary, CredentialDefinition, CredentialDefinitionDraft, IssuedCredential,
    IssuerId, PrivateKeyMaterial, RegistryDefinition, RegistryDefinitionDraft, RegistryId,
    RegistryType, RevRegError, RevRegResult, SchemaId, StatusList,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

const CRED_DEF_DOMAIN: &[u8] = b"revreg/cred-def/v1";
const REG_DEF_DOMAIN: &[u8] = b"revreg/rev-reg-def/v1";
const TAILS_DOMAIN: &[u8] = b"revreg/tails/v1";
const ACCUM_DOMAIN: &[u8] = b"revreg/accumulator/v1";

fn random_secret() -> PrivateKeyMaterial {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = PrivateKeyMaterial(bytes.to_vec());
    bytes.zeroize();
    key
}

fn public_from_secret(domain: &[u8], secret: &PrivateKeyMaterial, context: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(secret.as_bytes());
    for part in context {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Accumulator value over a registry public key and its revocation bits.
pub fn accumulator_digest(public_key: &str, revocation_list: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ACCUM_DOMAIN);
    hasher.update(public_key.as_bytes());
    hasher.update(revocation_list);
    hex::encode(hasher.finalize())
}

fn credential_mac(
    cred_def_key: &PrivateKeyMaterial,
    credential: &IssuedCredential,
    registry_public_key: Option<&str>,
) -> RevRegResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(cred_def_key.as_bytes())
        .map_err(|e| RevRegError::Accumulator(format!("invalid credential key: {}", e)))?;
    mac.update(credential.cred_def_id.as_str().as_bytes());
    if let Some(registry_id) = &credential.registry_id {
        mac.update(b"|");
        mac.update(registry_id.as_str().as_bytes());
    }
    if let Some(index) = credential.index {
        mac.update(&index.to_be_bytes());
    }
    if let Some(pk) = registry_public_key {
        mac.update(pk.as_bytes());
    }
    mac.update(&serde_json::to_vec(&credential.values)?);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check a credential signature produced by [`Sha256Accumulator`].
pub fn verify_credential(
    credential: &IssuedCredential,
    cred_def_key: &PrivateKeyMaterial,
    registry_def: Option<&RegistryDefinition>,
) -> bool {
    let expected = match credential_mac(
        cred_def_key,
        credential,
        registry_def.map(|d| d.public_key.as_str()),
    ) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    let actual = match hex::decode(&credential.signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    expected.as_slice().ct_eq(actual.as_slice()).into()
}

/// Reference [`AccumulatorLibrary`] built on SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Accumulator;

impl Sha256Accumulator {
    pub fn new() -> Self {
        Self
    }
}

impl AccumulatorLibrary for Sha256Accumulator {
    fn create_credential_definition(
        &self,
        issuer_id: &IssuerId,
        schema_id: &SchemaId,
        attr_names: &BTreeSet<String>,
        tag: &str,
        support_revocation: bool,
    ) -> RevRegResult<(CredentialDefinitionDraft, PrivateKeyMaterial)> {
        let secret = random_secret();
        let attrs = attr_names.iter().cloned().collect::<Vec<_>>().join(",");
        let public_key = public_from_secret(
            CRED_DEF_DOMAIN,
            &secret,
            &[issuer_id.as_str(), schema_id.as_str(), attrs.as_str(), tag],
        );
        let draft = CredentialDefinitionDraft {
            issuer_id: issuer_id.clone(),
            schema_id: schema_id.clone(),
            attr_names: attr_names.clone(),
            tag: tag.to_string(),
            support_revocation,
            public_key,
        };
        Ok((draft, secret))
    }

    fn create_registry_definition(
        &self,
        cred_def: &CredentialDefinition,
        issuer_id: &IssuerId,
        tag: &str,
        registry_type: RegistryType,
        capacity: u32,
    ) -> RevRegResult<(RegistryDefinitionDraft, PrivateKeyMaterial)> {
        if capacity == 0 {
            return Err(RevRegError::Accumulator(
                "registry capacity must be positive".into(),
            ));
        }
        if !cred_def.support_revocation {
            return Err(RevRegError::Accumulator(format!(
                "credential definition {} does not support revocation",
                cred_def.id
            )));
        }

        let secret = random_secret();
        let public_key = public_from_secret(
            REG_DEF_DOMAIN,
            &secret,
            &[cred_def.id.as_str(), issuer_id.as_str(), tag],
        );

        let mut tails = Sha256::new();
        tails.update(TAILS_DOMAIN);
        tails.update(public_key.as_bytes());
        tails.update(capacity.to_be_bytes());
        let tails_hash = hex::encode(tails.finalize());

        tracing::debug!(cred_def_id = %cred_def.id, capacity, "generated registry definition");
        let draft = RegistryDefinitionDraft {
            issuer_id: issuer_id.clone(),
            cred_def_id: cred_def.id.clone(),
            registry_type,
            tag: tag.to_string(),
            max_cred_num: capacity,
            public_key,
            tails_location: tails_hash.clone(),
            tails_hash,
        };
        Ok((draft, secret))
    }

    fn create_status_list(
        &self,
        registry_id: &RegistryId,
        registry_def: &RegistryDefinition,
        issuer_id: &IssuerId,
    ) -> RevRegResult<StatusList> {
        let bits = vec![0u8; registry_def.max_cred_num as usize];
        Ok(StatusList {
            registry_id: registry_id.clone(),
            issuer_id: issuer_id.clone(),
            accumulator: accumulator_digest(&registry_def.public_key, &bits),
            revocation_list: bits,
            timestamp: None,
        })
    }

    fn update_status_list(
        &self,
        prev: &StatusList,
        timestamp: Option<u64>,
        revoked: &BTreeSet<u32>,
        registry_def: &RegistryDefinition,
    ) -> RevRegResult<StatusList> {
        let capacity = registry_def.max_cred_num as usize;
        if prev.revocation_list.len() != capacity {
            return Err(RevRegError::Accumulator(format!(
                "status list has {} entries, registry capacity is {}",
                prev.revocation_list.len(),
                capacity
            )));
        }

        let mut bits = prev.revocation_list.clone();
        for index in revoked {
            let slot = (*index as usize)
                .checked_sub(1)
                .filter(|slot| *slot < capacity)
                .ok_or_else(|| {
                    RevRegError::Accumulator(format!(
                        "index {} outside registry capacity {}",
                        index, capacity
                    ))
                })?;
            bits[slot] = 1;
        }

        Ok(StatusList {
            registry_id: prev.registry_id.clone(),
            issuer_id: prev.issuer_id.clone(),
            accumulator: accumulator_digest(&registry_def.public_key, &bits),
            revocation_list: bits,
            timestamp,
        })
    }

    fn create_credential(
        &self,
        cred_def: &CredentialDefinition,
        cred_def_key: &PrivateKeyMaterial,
        values: &BTreeMap<String, String>,
        registry: Option<(&RegistryDefinition, &PrivateKeyMaterial, u32)>,
    ) -> RevRegResult<IssuedCredential> {
        if let Some((def, _, index)) = registry {
            if index == 0 || index > def.max_cred_num {
                return Err(RevRegError::Accumulator(format!(
                    "index {} outside registry capacity {}",
                    index, def.max_cred_num
                )));
            }
        }

        let mut credential = IssuedCredential {
            cred_def_id: cred_def.id.clone(),
            registry_id: registry.map(|(def, _, _)| def.id.clone()),
            index: registry.map(|(_, _, index)| index),
            values: values.clone(),
            signature: String::new(),
        };
        let mac = credential_mac(
            cred_def_key,
            &credential,
            registry.map(|(def, _, _)| def.public_key.as_str()),
        )?;
        credential.signature = hex::encode(mac);
        Ok(credential)
    }
}

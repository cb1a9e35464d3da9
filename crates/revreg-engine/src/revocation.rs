//! Revocation Batch Engine.
//!
//! A batch reads the registry, its status list and its index state without
//! locking, computes the new status list, then re-reads the index state for
//! update and commits only if it is unchanged. A changed index state means
//! another writer committed in between; the batch starts over from the read.

use crate::cache::StatusListCache;
use crate::context::EngineContext;
use crate::error::{Context, EngineError, EngineResult};
use crate::occ::{Attempt, OptimisticRetry, Settled};
use crate::records::{
    decode, encode, fetch_required, registry_key_tags, CATEGORY_PENDING, CATEGORY_REG_DEF,
    CATEGORY_REG_INFO, CATEGORY_STATUS_LIST,
};
use revreg_core::{
    Entry, RegistryDefinition, RegistryId, RegistryIndexState, StatusList, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Why a requested index was not revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationFailure {
    /// Below 1 or above the registry capacity.
    OutOfRange,
    /// Within capacity but never allocated.
    NotYetIssued,
    AlreadyRevoked,
}

impl RevocationFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationFailure::OutOfRange => "out of range",
            RevocationFailure::NotYetIssued => "not yet issued",
            RevocationFailure::AlreadyRevoked => "already revoked",
        }
    }
}

impl fmt::Display for RevocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedIndex {
    pub index: i64,
    pub reason: RevocationFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    FullySucceeded,
    PartiallySucceeded,
    NothingToDo,
}

/// Result of one revocation batch.
#[derive(Debug, Clone)]
pub struct RevocationOutcome {
    pub registry_id: RegistryId,
    /// Status list the batch started from.
    pub prev: StatusList,
    /// Status list written by the batch; `None` when nothing was eligible.
    pub curr: Option<StatusList>,
    /// Indices newly revoked by this batch.
    pub revoked: BTreeSet<u32>,
    pub failed: Vec<FailedIndex>,
    pub attempts: u32,
}

impl RevocationOutcome {
    pub fn kind(&self) -> OutcomeKind {
        if self.revoked.is_empty() {
            OutcomeKind::NothingToDo
        } else if self.failed.is_empty() {
            OutcomeKind::FullySucceeded
        } else {
            OutcomeKind::PartiallySucceeded
        }
    }

    pub fn failure_for(&self, index: i64) -> Option<RevocationFailure> {
        self.failed
            .iter()
            .find(|f| f.index == index)
            .map(|f| f.reason)
    }
}

/// Split `requested` into eligible indices and per-index failures.
///
/// Duplicates are collapsed; failures keep the order of first appearance.
pub fn partition_indices(
    requested: &[i64],
    state: &RegistryIndexState,
) -> (BTreeSet<u32>, Vec<FailedIndex>) {
    let mut seen = BTreeSet::new();
    let mut eligible = BTreeSet::new();
    let mut failed = Vec::new();

    for &index in requested {
        if !seen.insert(index) {
            continue;
        }
        let reason = if index < 1 || index > i64::from(state.max_capacity) {
            Some(RevocationFailure::OutOfRange)
        } else if index > i64::from(state.current_index) {
            Some(RevocationFailure::NotYetIssued)
        } else if state.revoked.contains(&(index as u32)) {
            Some(RevocationFailure::AlreadyRevoked)
        } else {
            None
        };
        match reason {
            Some(reason) => failed.push(FailedIndex { index, reason }),
            None => {
                eligible.insert(index as u32);
            }
        }
    }
    (eligible, failed)
}

/// Result of [`RevocationEngine::mark_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOutcome {
    /// Every index now pending for the registry.
    pub pending: BTreeSet<u32>,
    /// Requested indices that were not recorded, with the reason.
    pub rejected: Vec<FailedIndex>,
}

#[derive(Clone)]
pub struct RevocationEngine {
    ctx: EngineContext,
    cache: Arc<StatusListCache>,
}

impl RevocationEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            cache: Arc::new(StatusListCache::new()),
        }
    }

    pub fn cache(&self) -> &StatusListCache {
        &self.cache
    }

    /// Revoke `indices` of `registry_id` in one batch.
    ///
    /// Invalid indices are reported in the outcome, never as an error. The
    /// call itself fails only on store, accumulator or registrar errors, or
    /// with [`EngineError::RevocationConflict`] once every attempt lost to a
    /// concurrent writer.
    pub fn revoke(&self, registry_id: &RegistryId, indices: &[i64]) -> EngineResult<RevocationOutcome> {
        let retry = OptimisticRetry::new(self.ctx.config.max_revocation_attempts);
        let settled = retry.run(|attempt| self.attempt(registry_id, indices, attempt))?;

        match settled {
            Settled::Done { value, attempts } => {
                for failure in &value.failed {
                    tracing::warn!(
                        registry_id = %registry_id,
                        index = failure.index,
                        reason = %failure.reason,
                        "index not revoked"
                    );
                }
                tracing::info!(
                    registry_id = %registry_id,
                    revoked = value.revoked.len(),
                    failed = value.failed.len(),
                    attempts,
                    "revocation batch finished"
                );
                Ok(value)
            }
            Settled::Exhausted { attempts } => {
                tracing::error!(registry_id = %registry_id, attempts, "revocation retries exhausted");
                Err(EngineError::RevocationConflict {
                    registry_id: registry_id.to_string(),
                    attempts,
                })
            }
        }
    }

    fn attempt(
        &self,
        registry_id: &RegistryId,
        indices: &[i64],
        attempt: u32,
    ) -> EngineResult<Attempt<RevocationOutcome>> {
        // Read without locks. The index state goes first: any batch that
        // commits after this read changes it, so the check below catches a
        // status list read later than the snapshot.
        let snapshot: RegistryIndexState =
            self.read(CATEGORY_REG_INFO, registry_id, "registry index state")?;
        let def: RegistryDefinition = self.read(CATEGORY_REG_DEF, registry_id, "registry")?;
        let (prev, list_entry): (StatusList, Entry) =
            self.read_entry(CATEGORY_STATUS_LIST, registry_id, "status list")?;

        let (eligible, failed) = partition_indices(indices, &snapshot);
        if eligible.is_empty() {
            tracing::debug!(registry_id = %registry_id, "nothing to revoke");
            return Ok(Attempt::Done(RevocationOutcome {
                registry_id: registry_id.clone(),
                prev,
                curr: None,
                revoked: eligible,
                failed,
                attempts: attempt,
            }));
        }

        // compute outside any transaction
        let curr = self
            .ctx
            .accumulator
            .update_status_list(
                &prev,
                Some(Timestamp::now().seconds_since_epoch),
                &eligible,
                &def,
            )
            .accum_ctx(format!("updating status list for {}", registry_id))?;

        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let (current, _): (RegistryIndexState, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_REG_INFO,
            registry_id.as_str(),
            true,
            "registry index state",
        )?;
        if current != snapshot {
            tracing::debug!(
                registry_id = %registry_id,
                attempt,
                seen = snapshot.version,
                found = current.version,
                "index state changed since read"
            );
            return Ok(Attempt::Conflict);
        }

        let mut next = current;
        next.revoked.extend(eligible.iter().copied());
        next.version += 1;
        txn.replace(
            CATEGORY_STATUS_LIST,
            registry_id.as_str(),
            &encode(&curr)?,
            &list_entry.tags,
        )
        .store_ctx(format!("updating status list {}", registry_id))?;
        txn.replace(
            CATEGORY_REG_INFO,
            registry_id.as_str(),
            &encode(&next)?,
            &registry_key_tags(registry_id.as_str()),
        )
        .store_ctx(format!("updating index state {}", registry_id))?;
        txn.commit()
            .store_ctx(format!("committing revocation of {}", registry_id))?;
        self.cache.invalidate(registry_id);

        Ok(Attempt::Done(RevocationOutcome {
            registry_id: registry_id.clone(),
            prev,
            curr: Some(curr),
            revoked: eligible,
            failed,
            attempts: attempt,
        }))
    }

    /// Current status list, served from the cache.
    pub fn status_list(&self, registry_id: &RegistryId) -> EngineResult<StatusList> {
        self.cache.get_or_load(registry_id, || {
            self.read(CATEGORY_STATUS_LIST, registry_id, "status list")
        })
    }

    // -----------------------------------------------------------------------
    // Pending revocations
    // -----------------------------------------------------------------------

    /// Record indices to revoke in a later batch.
    ///
    /// Indices are checked against the index state the same way a batch
    /// checks them; only those a batch could revoke now are recorded.
    pub fn mark_pending(&self, registry_id: &RegistryId, indices: &[i64]) -> EngineResult<PendingOutcome> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let (state, _): (RegistryIndexState, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_REG_INFO,
            registry_id.as_str(),
            false,
            "registry index state",
        )?;
        let (eligible, rejected) = partition_indices(indices, &state);
        if eligible.is_empty() {
            drop(txn);
            return Ok(PendingOutcome {
                pending: self.pending(registry_id)?,
                rejected,
            });
        }

        let existing = txn
            .fetch(CATEGORY_PENDING, registry_id.as_str(), true)
            .store_ctx(format!("fetching pending revocations {}", registry_id))?;

        let pending = match existing {
            Some(entry) => {
                let mut pending: BTreeSet<u32> = decode(&entry)?;
                pending.extend(eligible.iter().copied());
                txn.replace(
                    CATEGORY_PENDING,
                    registry_id.as_str(),
                    &encode(&pending)?,
                    &entry.tags,
                )
                .store_ctx(format!("updating pending revocations {}", registry_id))?;
                pending
            }
            None => {
                let pending = eligible;
                txn.insert(
                    CATEGORY_PENDING,
                    registry_id.as_str(),
                    &encode(&pending)?,
                    &registry_key_tags(registry_id.as_str()),
                )
                .store_ctx(format!("storing pending revocations {}", registry_id))?;
                pending
            }
        };
        txn.commit()
            .store_ctx(format!("committing pending revocations {}", registry_id))?;

        tracing::debug!(
            registry_id = %registry_id,
            pending = pending.len(),
            rejected = rejected.len(),
            "revocations marked pending"
        );
        Ok(PendingOutcome { pending, rejected })
    }

    pub fn pending(&self, registry_id: &RegistryId) -> EngineResult<BTreeSet<u32>> {
        match self
            .ctx
            .store
            .fetch(CATEGORY_PENDING, registry_id.as_str())
            .store_ctx(format!("fetching pending revocations {}", registry_id))?
        {
            Some(entry) => decode(&entry),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Revoke every pending index in one batch and forget them.
    ///
    /// Indices marked while the batch ran stay pending.
    pub fn publish_pending(&self, registry_id: &RegistryId) -> EngineResult<Option<RevocationOutcome>> {
        let pending = self.pending(registry_id)?;
        if pending.is_empty() {
            return Ok(None);
        }
        let requested: Vec<i64> = pending.iter().map(|i| i64::from(*i)).collect();
        let outcome = self.revoke(registry_id, &requested)?;
        self.clear(registry_id, Some(&pending))?;
        Ok(Some(outcome))
    }

    /// Drop every pending index of `registry_id`.
    pub fn clear_pending(&self, registry_id: &RegistryId) -> EngineResult<()> {
        self.clear(registry_id, None)
    }

    fn clear(&self, registry_id: &RegistryId, only: Option<&BTreeSet<u32>>) -> EngineResult<()> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let Some(entry) = txn
            .fetch(CATEGORY_PENDING, registry_id.as_str(), true)
            .store_ctx(format!("fetching pending revocations {}", registry_id))?
        else {
            return Ok(());
        };

        let remaining: BTreeSet<u32> = match only {
            Some(done) => {
                let pending: BTreeSet<u32> = decode(&entry)?;
                pending.difference(done).copied().collect()
            }
            None => BTreeSet::new(),
        };
        let written = if remaining.is_empty() {
            txn.remove(CATEGORY_PENDING, registry_id.as_str())
        } else {
            txn.replace(
                CATEGORY_PENDING,
                registry_id.as_str(),
                &encode(&remaining)?,
                &entry.tags,
            )
        };
        written.store_ctx(format!("clearing pending revocations {}", registry_id))?;
        txn.commit()
            .store_ctx(format!("committing pending revocations {}", registry_id))
    }

    // -----------------------------------------------------------------------
    // Session reads
    // -----------------------------------------------------------------------

    fn read_entry<T: serde::de::DeserializeOwned>(
        &self,
        category: &str,
        registry_id: &RegistryId,
        kind: &'static str,
    ) -> EngineResult<(T, Entry)> {
        let entry = self
            .ctx
            .store
            .fetch(category, registry_id.as_str())
            .store_ctx(format!("fetching {} {}", kind, registry_id))?
            .ok_or_else(|| EngineError::not_found(kind, registry_id))?;
        Ok((decode(&entry)?, entry))
    }

    fn read<T: serde::de::DeserializeOwned>(
        &self,
        category: &str,
        registry_id: &RegistryId,
        kind: &'static str,
    ) -> EngineResult<T> {
        self.read_entry(category, registry_id, kind).map(|(value, _)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(current: u32, capacity: u32, revoked: &[u32]) -> RegistryIndexState {
        let mut s = RegistryIndexState::new(capacity);
        s.current_index = current;
        s.revoked = revoked.iter().copied().collect();
        s
    }

    #[test]
    fn test_partition_classifies_each_index() {
        let s = state(3, 5, &[2]);
        let (eligible, failed) = partition_indices(&[0, -4, 1, 2, 3, 4, 6], &s);
        assert_eq!(eligible, BTreeSet::from([1, 3]));
        assert_eq!(
            failed,
            vec![
                FailedIndex { index: 0, reason: RevocationFailure::OutOfRange },
                FailedIndex { index: -4, reason: RevocationFailure::OutOfRange },
                FailedIndex { index: 2, reason: RevocationFailure::AlreadyRevoked },
                FailedIndex { index: 4, reason: RevocationFailure::NotYetIssued },
                FailedIndex { index: 6, reason: RevocationFailure::OutOfRange },
            ]
        );
    }

    #[test]
    fn test_partition_collapses_duplicates() {
        let s = state(3, 5, &[]);
        let (eligible, failed) = partition_indices(&[2, 2, 9, 9], &s);
        assert_eq!(eligible, BTreeSet::from([2]));
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn test_outcome_kind() {
        let list = StatusList {
            registry_id: RegistryId::new("reg"),
            issuer_id: revreg_core::IssuerId::new("did:sov:x"),
            revocation_list: vec![0; 4],
            accumulator: String::new(),
            timestamp: None,
        };
        let mut outcome = RevocationOutcome {
            registry_id: RegistryId::new("reg"),
            prev: list.clone(),
            curr: None,
            revoked: BTreeSet::new(),
            failed: vec![],
            attempts: 1,
        };
        assert_eq!(outcome.kind(), OutcomeKind::NothingToDo);
        outcome.revoked.insert(1);
        outcome.curr = Some(list);
        assert_eq!(outcome.kind(), OutcomeKind::FullySucceeded);
        outcome.failed.push(FailedIndex {
            index: 7,
            reason: RevocationFailure::OutOfRange,
        });
        assert_eq!(outcome.kind(), OutcomeKind::PartiallySucceeded);
        assert_eq!(outcome.failure_for(7), Some(RevocationFailure::OutOfRange));
    }
}

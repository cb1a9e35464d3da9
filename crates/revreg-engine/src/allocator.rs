use crate::context::EngineContext;
use crate::error::{Context, EngineError, EngineResult};
use crate::records::{encode, fetch_required, registry_key_tags, CATEGORY_REG_INFO};
use revreg_core::{RegistryId, RegistryIndexState};

/// Hands out credential indices within a registry's capacity.
///
/// Each call is one short transaction around the index state. The index is
/// committed before the caller creates any credential material, so an index
/// whose credential creation later fails is skipped for good.
#[derive(Clone)]
pub struct IndexAllocator {
    ctx: EngineContext,
}

impl IndexAllocator {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Reserve the next index of `registry_id`.
    ///
    /// Fails with [`EngineError::RegistryFull`] without touching the index
    /// state once every index has been handed out.
    pub fn allocate_index(&self, registry_id: &RegistryId) -> EngineResult<u32> {
        let mut txn = self.ctx.store.transaction().store_ctx("opening transaction")?;
        let (mut state, _): (RegistryIndexState, _) = fetch_required(
            txn.as_mut(),
            CATEGORY_REG_INFO,
            registry_id.as_str(),
            true,
            "registry index state",
        )?;

        if state.is_full() {
            tracing::debug!(
                registry_id = %registry_id,
                capacity = state.max_capacity,
                "registry full"
            );
            return Err(EngineError::RegistryFull(registry_id.to_string()));
        }

        let next = state.current_index + 1;
        state.current_index = next;
        state.version += 1;
        txn.replace(
            CATEGORY_REG_INFO,
            registry_id.as_str(),
            &encode(&state)?,
            &registry_key_tags(registry_id.as_str()),
        )
        .store_ctx(format!("updating index state {}", registry_id))?;
        txn.commit()
            .store_ctx(format!("committing index {} of {}", next, registry_id))?;

        tracing::debug!(registry_id = %registry_id, index = next, "index allocated");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryManager;
    use crate::test_support::{context, revocable_cred_def};
    use revreg_core::RegistryType;

    #[test]
    fn test_sequential_then_full() {
        let (ctx, _) = context();
        let cd = revocable_cred_def(&ctx);
        let registries = RegistryManager::new(ctx.clone());
        let def = registries
            .create_registry(&cd.issuer_id, &cd.id, 4, RegistryType::ClAccum, "0")
            .unwrap();

        let allocator = IndexAllocator::new(ctx);
        let got: Vec<u32> = (0..4)
            .map(|_| allocator.allocate_index(&def.id).unwrap())
            .collect();
        assert_eq!(got, vec![1, 2, 3, 4]);

        let before = registries.index_state(&def.id).unwrap();
        let err = allocator.allocate_index(&def.id).unwrap_err();
        assert!(matches!(err, EngineError::RegistryFull(_)));
        assert_eq!(registries.index_state(&def.id).unwrap(), before);
    }

    #[test]
    fn test_unknown_registry() {
        let (ctx, _) = context();
        let err = IndexAllocator::new(ctx)
            .allocate_index(&RegistryId::new("missing"))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}

use crate::error::EngineResult;
use revreg_core::{RegistryId, StatusList};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Status lists by registry id.
///
/// Owned by the revocation engine. An entry is dropped whenever a revocation
/// batch commits for its registry, so a hit is never older than the last
/// commit made through the same engine.
#[derive(Default)]
pub struct StatusListCache {
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    lists: HashMap<RegistryId, StatusList>,
    /// Bumped by every invalidation. A load only fills the entry if no
    /// invalidation happened while it ran.
    generations: HashMap<RegistryId, u64>,
}

impl CacheState {
    fn generation(&self, registry_id: &RegistryId) -> u64 {
        self.generations.get(registry_id).copied().unwrap_or(0)
    }
}

impl StatusListCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The maps stay consistent under every operation, so a poisoned lock is
    /// taken over rather than skipping an invalidation.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::warn!("status list cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Cached list for `registry_id`, or the result of `load`.
    ///
    /// `load` runs without the lock held. Its result is returned either way
    /// but only cached when the registry was not invalidated meanwhile.
    pub fn get_or_load<F>(&self, registry_id: &RegistryId, load: F) -> EngineResult<StatusList>
    where
        F: FnOnce() -> EngineResult<StatusList>,
    {
        let generation = {
            let state = self.lock();
            if let Some(list) = state.lists.get(registry_id) {
                return Ok(list.clone());
            }
            state.generation(registry_id)
        };

        let list = load()?;

        let mut state = self.lock();
        if state.generation(registry_id) == generation {
            state.lists.insert(registry_id.clone(), list.clone());
        } else {
            tracing::debug!(
                registry_id = %registry_id,
                "status list invalidated during load, not caching"
            );
        }
        Ok(list)
    }

    pub fn invalidate(&self, registry_id: &RegistryId) {
        let mut state = self.lock();
        *state.generations.entry(registry_id.clone()).or_insert(0) += 1;
        state.lists.remove(registry_id);
    }

    pub fn contains(&self, registry_id: &RegistryId) -> bool {
        self.lock().lists.contains_key(registry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use revreg_core::IssuerId;
    use std::cell::Cell;

    fn list(acc: &str) -> StatusList {
        StatusList {
            registry_id: RegistryId::new("reg"),
            issuer_id: IssuerId::new("did:sov:issuer"),
            revocation_list: vec![0; 4],
            accumulator: acc.into(),
            timestamp: None,
        }
    }

    #[test]
    fn test_loads_once_until_invalidated() {
        let cache = StatusListCache::new();
        let id = RegistryId::new("reg");
        let loads = Cell::new(0);

        let first = cache
            .get_or_load(&id, || {
                loads.set(loads.get() + 1);
                Ok(list("a"))
            })
            .unwrap();
        let second = cache
            .get_or_load(&id, || {
                loads.set(loads.get() + 1);
                Ok(list("b"))
            })
            .unwrap();
        assert_eq!(first.accumulator, "a");
        assert_eq!(second.accumulator, "a");
        assert_eq!(loads.get(), 1);

        cache.invalidate(&id);
        assert!(!cache.contains(&id));
        let third = cache.get_or_load(&id, || Ok(list("c"))).unwrap();
        assert_eq!(third.accumulator, "c");
    }

    #[test]
    fn test_load_error_not_cached() {
        let cache = StatusListCache::new();
        let id = RegistryId::new("reg");
        assert!(cache
            .get_or_load(&id, || Err(EngineError::not_found("status list", "reg")))
            .is_err());
        assert!(!cache.contains(&id));
    }

    #[test]
    fn test_invalidation_during_load_not_cached() {
        let cache = StatusListCache::new();
        let id = RegistryId::new("reg");

        let loaded = cache
            .get_or_load(&id, || {
                cache.invalidate(&id);
                Ok(list("stale"))
            })
            .unwrap();
        assert_eq!(loaded.accumulator, "stale");
        assert!(!cache.contains(&id));

        let fresh = cache.get_or_load(&id, || Ok(list("fresh"))).unwrap();
        assert_eq!(fresh.accumulator, "fresh");
        assert!(cache.contains(&id));
    }

    #[test]
    fn test_poisoned_lock_still_invalidates() {
        let cache = std::sync::Arc::new(StatusListCache::new());
        let id = RegistryId::new("reg");
        cache.get_or_load(&id, || Ok(list("a"))).unwrap();

        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.state.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();
        assert!(cache.state.is_poisoned());

        cache.invalidate(&id);
        assert!(!cache.contains(&id));
    }
}

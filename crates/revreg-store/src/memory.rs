use crate::error::{StoreError, StoreResult};
use revreg_core::{Entry, RecordStore, RevRegResult, StoreTransaction, TagFilter, Tags};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Key = (String, String);

#[derive(Debug, Clone)]
struct Row {
    value: Vec<u8>,
    tags: Tags,
    seq: u64,
}

#[derive(Debug, Default)]
struct Committed {
    rows: BTreeMap<Key, Row>,
    next_seq: u64,
}

/// In-memory record store.
///
/// Committed rows sit behind an `RwLock` so session reads never wait on an
/// open transaction. Transactions serialize on a separate writer mutex and
/// stage their writes until commit.
pub struct InMemoryStore {
    committed: RwLock<Committed>,
    writer: Mutex<()>,
}

fn read_rows(lock: &RwLock<Committed>) -> StoreResult<RwLockReadGuard<'_, Committed>> {
    lock.read()
        .map_err(|e| StoreError::LockPoisoned(e.to_string()))
}

fn write_rows(lock: &RwLock<Committed>) -> StoreResult<RwLockWriteGuard<'_, Committed>> {
    lock.write()
        .map_err(|e| StoreError::LockPoisoned(e.to_string()))
}

fn to_entry(key: &Key, row: &Row) -> Entry {
    Entry {
        category: key.0.clone(),
        name: key.1.clone(),
        value: row.value.clone(),
        tags: row.tags.clone(),
        seq: row.seq,
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(Committed::default()),
            writer: Mutex::new(()),
        }
    }

    /// Number of committed records (for testing/inspection).
    pub fn count(&self) -> usize {
        read_rows(&self.committed)
            .map(|c| c.rows.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryStore {
    fn fetch(&self, category: &str, name: &str) -> RevRegResult<Option<Entry>> {
        let committed = read_rows(&self.committed)?;
        let key = (category.to_string(), name.to_string());
        Ok(committed.rows.get(&key).map(|row| to_entry(&key, row)))
    }

    fn fetch_all(&self, category: &str, filter: &TagFilter) -> RevRegResult<Vec<Entry>> {
        let committed = read_rows(&self.committed)?;
        let mut out: Vec<Entry> = committed
            .rows
            .iter()
            .filter(|(key, row)| key.0 == category && filter.matches(&row.tags))
            .map(|(key, row)| to_entry(key, row))
            .collect();
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    fn transaction(&self) -> RevRegResult<Box<dyn StoreTransaction + '_>> {
        let guard = self
            .writer
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let next_seq = read_rows(&self.committed)?.next_seq;
        Ok(Box::new(MemoryTransaction {
            store: self,
            _writer: guard,
            staged: BTreeMap::new(),
            next_seq,
        }))
    }
}

// ---------------------------------------------------------------------------
// MemoryTransaction — staged writes, applied on commit
// ---------------------------------------------------------------------------

struct MemoryTransaction<'a> {
    store: &'a InMemoryStore,
    _writer: MutexGuard<'a, ()>,
    /// `None` marks a staged removal.
    staged: BTreeMap<Key, Option<Row>>,
    next_seq: u64,
}

impl MemoryTransaction<'_> {
    fn current(&self, key: &Key) -> StoreResult<Option<Row>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        let committed = read_rows(&self.store.committed)?;
        Ok(committed.rows.get(key).cloned())
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn fetch(
        &mut self,
        category: &str,
        name: &str,
        _for_update: bool,
    ) -> RevRegResult<Option<Entry>> {
        // The writer mutex already makes every row exclusive to this transaction.
        let key = (category.to_string(), name.to_string());
        Ok(self.current(&key)?.map(|row| to_entry(&key, &row)))
    }

    fn fetch_all(&mut self, category: &str, filter: &TagFilter) -> RevRegResult<Vec<Entry>> {
        let committed = read_rows(&self.store.committed)?;
        let mut merged: BTreeMap<Key, Row> = committed
            .rows
            .iter()
            .filter(|(key, _)| key.0 == category)
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect();
        drop(committed);

        for (key, staged) in self.staged.iter().filter(|(key, _)| key.0 == category) {
            match staged {
                Some(row) => {
                    merged.insert(key.clone(), row.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        let mut out: Vec<Entry> = merged
            .iter()
            .filter(|(_, row)| filter.matches(&row.tags))
            .map(|(key, row)| to_entry(key, row))
            .collect();
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    fn insert(&mut self, category: &str, name: &str, value: &[u8], tags: &Tags) -> RevRegResult<()> {
        let key = (category.to_string(), name.to_string());
        if self.current(&key)?.is_some() {
            return Err(StoreError::Duplicate {
                category: key.0,
                name: key.1,
            }
            .into());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.staged.insert(
            key,
            Some(Row {
                value: value.to_vec(),
                tags: tags.clone(),
                seq,
            }),
        );
        Ok(())
    }

    fn replace(&mut self, category: &str, name: &str, value: &[u8], tags: &Tags) -> RevRegResult<()> {
        let key = (category.to_string(), name.to_string());
        let existing = self.current(&key)?.ok_or_else(|| StoreError::NotFound {
            category: key.0.clone(),
            name: key.1.clone(),
        })?;
        self.staged.insert(
            key,
            Some(Row {
                value: value.to_vec(),
                tags: tags.clone(),
                seq: existing.seq,
            }),
        );
        Ok(())
    }

    fn remove(&mut self, category: &str, name: &str) -> RevRegResult<()> {
        let key = (category.to_string(), name.to_string());
        if self.current(&key)?.is_none() {
            return Err(StoreError::NotFound {
                category: key.0,
                name: key.1,
            }
            .into());
        }
        self.staged.insert(key, None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> RevRegResult<()> {
        let this = *self;
        let store = this.store;
        let mut committed = write_rows(&store.committed)?;
        let writes = this.staged.len();
        for (key, staged) in this.staged {
            match staged {
                Some(row) => {
                    committed.rows.insert(key, row);
                }
                None => {
                    committed.rows.remove(&key);
                }
            }
        }
        committed.next_seq = committed.next_seq.max(this.next_seq);
        tracing::trace!(writes, "memory transaction committed");
        Ok(())
    }
}

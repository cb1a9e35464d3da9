use crate::error::{StoreError, StoreResult};
use revreg_core::{Entry, RecordStore, RevRegResult, StoreTransaction, TagFilter, Tags};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

/// SQLite record store.
///
/// One connection behind a mutex. A transaction keeps the connection locked
/// from `BEGIN IMMEDIATE` until commit or drop, so session reads issued from
/// other threads wait for it and only ever see committed rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn lock_conn(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::LockPoisoned(e.to_string()))
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Database(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                name TEXT NOT NULL,
                value BLOB NOT NULL,
                tags TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT DEFAULT (datetime('now')),
                UNIQUE (category, name)
            );
            CREATE INDEX IF NOT EXISTS records_category ON records (category);",
        )
        .map_err(|e| StoreError::Database(format!("failed to create tables: {}", e)))?;

        tracing::debug!(path, "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(":memory:")
    }
}

// ---------------------------------------------------------------------------
// Row helpers shared by session reads and transactions
// ---------------------------------------------------------------------------

fn decode_tags(category: &str, name: &str, raw: &str) -> StoreResult<Tags> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        category: category.to_string(),
        name: name.to_string(),
        reason: format!("bad tags: {}", e),
    })
}

fn encode_tags(tags: &Tags) -> StoreResult<String> {
    serde_json::to_string(tags).map_err(|e| StoreError::Database(format!("tag encoding: {}", e)))
}

fn select_one(conn: &Connection, category: &str, name: &str) -> StoreResult<Option<Entry>> {
    let row: Option<(i64, Vec<u8>, String)> = conn
        .query_row(
            "SELECT seq, value, tags FROM records WHERE category = ?1 AND name = ?2",
            params![category, name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    match row {
        Some((seq, value, tags)) => Ok(Some(Entry {
            category: category.to_string(),
            name: name.to_string(),
            value,
            tags: decode_tags(category, name, &tags)?,
            seq: seq as u64,
        })),
        None => Ok(None),
    }
}

fn select_all(conn: &Connection, category: &str, filter: &TagFilter) -> StoreResult<Vec<Entry>> {
    let mut stmt = conn.prepare(
        "SELECT seq, name, value, tags FROM records WHERE category = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![category], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Vec<u8>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (seq, name, value, raw_tags) = row?;
        let tags = decode_tags(category, &name, &raw_tags)?;
        if filter.matches(&tags) {
            out.push(Entry {
                category: category.to_string(),
                name,
                value,
                tags,
                seq: seq as u64,
            });
        }
    }
    Ok(out)
}

impl RecordStore for SqliteStore {
    fn fetch(&self, category: &str, name: &str) -> RevRegResult<Option<Entry>> {
        let conn = lock_conn(&self.conn)?;
        Ok(select_one(&conn, category, name)?)
    }

    fn fetch_all(&self, category: &str, filter: &TagFilter) -> RevRegResult<Vec<Entry>> {
        let conn = lock_conn(&self.conn)?;
        Ok(select_all(&conn, category, filter)?)
    }

    fn transaction(&self) -> RevRegResult<Box<dyn StoreTransaction + '_>> {
        let conn = lock_conn(&self.conn)?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StoreError::Database(format!("failed to begin transaction: {}", e)))?;
        Ok(Box::new(SqliteTransaction {
            conn,
            committed: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// SqliteTransaction — rolls back on drop unless committed
// ---------------------------------------------------------------------------

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    committed: bool,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn fetch(
        &mut self,
        category: &str,
        name: &str,
        _for_update: bool,
    ) -> RevRegResult<Option<Entry>> {
        // BEGIN IMMEDIATE holds the write lock for the whole transaction.
        Ok(select_one(&self.conn, category, name)?)
    }

    fn fetch_all(&mut self, category: &str, filter: &TagFilter) -> RevRegResult<Vec<Entry>> {
        Ok(select_all(&self.conn, category, filter)?)
    }

    fn insert(&mut self, category: &str, name: &str, value: &[u8], tags: &Tags) -> RevRegResult<()> {
        if select_one(&self.conn, category, name)?.is_some() {
            return Err(StoreError::Duplicate {
                category: category.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        self.conn
            .execute(
                "INSERT INTO records (category, name, value, tags) VALUES (?1, ?2, ?3, ?4)",
                params![category, name, value, encode_tags(tags)?],
            )
            .map_err(|e| StoreError::Database(format!("insert failed: {}", e)))?;
        Ok(())
    }

    fn replace(&mut self, category: &str, name: &str, value: &[u8], tags: &Tags) -> RevRegResult<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET value = ?3, tags = ?4, updated_at = datetime('now')
                 WHERE category = ?1 AND name = ?2",
                params![category, name, value, encode_tags(tags)?],
            )
            .map_err(|e| StoreError::Database(format!("update failed: {}", e)))?;
        if rows == 0 {
            return Err(StoreError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn remove(&mut self, category: &str, name: &str) -> RevRegResult<()> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM records WHERE category = ?1 AND name = ?2",
                params![category, name],
            )
            .map_err(|e| StoreError::Database(format!("delete failed: {}", e)))?;
        if rows == 0 {
            return Err(StoreError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> RevRegResult<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| StoreError::Database(format!("commit failed: {}", e)))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "sqlite rollback failed");
            }
        }
    }
}

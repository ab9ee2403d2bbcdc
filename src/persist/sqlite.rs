//! SQLite-backed key-value store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::debug;

use crate::{
    core::path::apply_increment,
    kv::{Item, ItemKey, KvStore, ScanPage, StoreError, StoreResult, WriteOp},
    op::{Condition, IncrementOp},
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite implementation of [`crate::kv::KvStore`].
///
/// Items are JSON documents in one `items` table keyed by
/// `(table_name, item_key)`. Every conditional write runs in an immediate
/// transaction, which makes the read of the current item and the write a
/// single atomic step.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))
    }

    fn in_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl KvStore for SqliteStore {
    fn put(&self, key: &ItemKey, item: Item, condition: Option<&Condition>) -> StoreResult<()> {
        key.check_item(&item)?;
        self.in_transaction(|tx| {
            if let Some(cond) = condition {
                check_condition(key, load(tx, key)?.as_ref(), cond)?;
            }
            save(tx, key, &item)
        })?;
        debug!(%key, "sqlite put");
        Ok(())
    }

    fn get(&self, key: &ItemKey) -> StoreResult<Option<Item>> {
        let conn = self.lock()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM items WHERE table_name = ?1 AND item_key = ?2",
                params![key.table, key.storage_key()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| decode_item(&p)).transpose()
    }

    fn delete(&self, key: &ItemKey, condition: Option<&Condition>) -> StoreResult<()> {
        self.in_transaction(|tx| {
            if let Some(cond) = condition {
                check_condition(key, load(tx, key)?.as_ref(), cond)?;
            }
            remove(tx, key)
        })?;
        debug!(%key, "sqlite delete");
        Ok(())
    }

    fn increment(&self, op: &IncrementOp) -> StoreResult<()> {
        self.in_transaction(|tx| {
            let updated = apply_increment(load(tx, &op.key)?.as_ref(), op)?;
            save(tx, &op.key, &updated)
        })?;
        debug!(key = %op.key, expression = %op.expression(), "sqlite increment");
        Ok(())
    }

    fn scan(&self, table: &str, start_after: Option<&str>, limit: usize) -> StoreResult<ScanPage> {
        let limit = limit.max(1);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_key, payload FROM items
             WHERE table_name = ?1 AND item_key > ?2
             ORDER BY item_key ASC LIMIT ?3",
        )?;

        // One row past the limit tells us whether another page exists.
        let rows = stmt.query_map(
            params![table, start_after.unwrap_or(""), (limit + 1) as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut items = Vec::new();
        let mut last_key = None;
        let mut more = false;
        for row in rows {
            let (item_key, payload) = row?;
            if items.len() == limit {
                more = true;
                break;
            }
            items.push(decode_item(&payload)?);
            last_key = Some(item_key);
        }

        Ok(ScanPage {
            items,
            last_key: if more { last_key } else { None },
        })
    }

    fn transact(&self, writes: &[WriteOp]) -> StoreResult<()> {
        self.in_transaction(|tx| {
            for write in writes {
                match write {
                    WriteOp::Put { key, item, condition } => {
                        key.check_item(item)?;
                        if let Some(cond) = condition {
                            check_condition(key, load(tx, key)?.as_ref(), cond)?;
                        }
                        save(tx, key, item)?;
                    }
                    WriteOp::Delete { key, condition } => {
                        if let Some(cond) = condition {
                            check_condition(key, load(tx, key)?.as_ref(), cond)?;
                        }
                        remove(tx, key)?;
                    }
                }
            }
            Ok(())
        })?;
        debug!(writes = writes.len(), "sqlite transact");
        Ok(())
    }
}

fn check_condition(key: &ItemKey, current: Option<&Item>, condition: &Condition) -> StoreResult<()> {
    if condition.holds(current) {
        Ok(())
    } else {
        Err(StoreError::ConditionFailed {
            key: key.to_string(),
        })
    }
}

fn load(tx: &Transaction<'_>, key: &ItemKey) -> StoreResult<Option<Item>> {
    let payload: Option<Vec<u8>> = tx
        .query_row(
            "SELECT payload FROM items WHERE table_name = ?1 AND item_key = ?2",
            params![key.table, key.storage_key()],
            |row| row.get(0),
        )
        .optional()?;
    payload.map(|p| decode_item(&p)).transpose()
}

fn save(tx: &Transaction<'_>, key: &ItemKey, item: &Item) -> StoreResult<()> {
    let payload = serde_json::to_vec(item)?;
    tx.execute(
        "INSERT INTO items(table_name, item_key, updated_ms, payload) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(table_name, item_key) DO UPDATE SET updated_ms = ?3, payload = ?4",
        params![key.table, key.storage_key(), now_ms() as i64, payload],
    )?;
    Ok(())
}

fn remove(tx: &Transaction<'_>, key: &ItemKey) -> StoreResult<()> {
    tx.execute(
        "DELETE FROM items WHERE table_name = ?1 AND item_key = ?2",
        params![key.table, key.storage_key()],
    )?;
    Ok(())
}

fn decode_item(payload: &[u8]) -> StoreResult<Item> {
    Ok(serde_json::from_slice(payload)?)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

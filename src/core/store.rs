use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;
use tracing::debug;

use crate::{
    kv::{Item, ItemKey, KvStore, ScanPage, StoreError, StoreResult, WriteOp},
    op::{Condition, IncrementOp},
};

use super::path::apply_increment;

type Table = BTreeMap<String, Item>;

/// In-process [`KvStore`].
///
/// All tables live behind one mutex, so every call is linearizable and
/// [`KvStore::transact`] is supported.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items currently held in `table`.
    pub fn len(&self, table: &str) -> StoreResult<usize> {
        Ok(self.lock()?.get(table).map_or(0, Table::len))
    }

    /// True when `table` holds no items.
    pub fn is_empty(&self, table: &str) -> StoreResult<bool> {
        Ok(self.len(table)? == 0)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Table>>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

fn check_condition(key: &ItemKey, current: Option<&Item>, condition: Option<&Condition>) -> StoreResult<()> {
    match condition {
        Some(cond) if !cond.holds(current) => Err(StoreError::ConditionFailed {
            key: key.to_string(),
        }),
        _ => Ok(()),
    }
}

fn apply_write(tables: &mut HashMap<String, Table>, write: &WriteOp) {
    match write {
        WriteOp::Put { key, item, .. } => {
            tables
                .entry(key.table.clone())
                .or_default()
                .insert(key.storage_key(), item.clone());
        }
        WriteOp::Delete { key, .. } => {
            if let Some(table) = tables.get_mut(&key.table) {
                table.remove(&key.storage_key());
            }
        }
    }
}

impl KvStore for MemoryStore {
    fn put(&self, key: &ItemKey, item: Item, condition: Option<&Condition>) -> StoreResult<()> {
        key.check_item(&item)?;
        let mut tables = self.lock()?;
        let table = tables.entry(key.table.clone()).or_default();
        let storage_key = key.storage_key();
        check_condition(key, table.get(&storage_key), condition)?;
        table.insert(storage_key, item);
        debug!(%key, "memory put");
        Ok(())
    }

    fn get(&self, key: &ItemKey) -> StoreResult<Option<Item>> {
        let tables = self.lock()?;
        Ok(tables
            .get(&key.table)
            .and_then(|table| table.get(&key.storage_key()))
            .cloned())
    }

    fn delete(&self, key: &ItemKey, condition: Option<&Condition>) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let storage_key = key.storage_key();
        let current = tables.get(&key.table).and_then(|t| t.get(&storage_key));
        check_condition(key, current, condition)?;
        if let Some(table) = tables.get_mut(&key.table) {
            table.remove(&storage_key);
        }
        debug!(%key, "memory delete");
        Ok(())
    }

    fn increment(&self, op: &IncrementOp) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let table = tables.entry(op.key.table.clone()).or_default();
        let storage_key = op.key.storage_key();
        let updated = apply_increment(table.get(&storage_key), op)?;
        table.insert(storage_key, updated);
        debug!(key = %op.key, expression = %op.expression(), "memory increment");
        Ok(())
    }

    fn scan(&self, table: &str, start_after: Option<&str>, limit: usize) -> StoreResult<ScanPage> {
        let limit = limit.max(1);
        let tables = self.lock()?;
        let Some(rows) = tables.get(table) else {
            return Ok(ScanPage::default());
        };

        let mut iter = rows
            .iter()
            .filter(|(k, _)| start_after.is_none_or(|after| k.as_str() > after));
        let mut items = Vec::new();
        let mut last_key = None;
        for (k, item) in iter.by_ref().take(limit) {
            items.push(item.clone());
            last_key = Some(k.clone());
        }
        if iter.next().is_none() {
            last_key = None;
        }
        Ok(ScanPage { items, last_key })
    }

    fn transact(&self, writes: &[WriteOp]) -> StoreResult<()> {
        let mut tables = self.lock()?;

        for write in writes {
            let (key, condition) = match write {
                WriteOp::Put { key, item, condition } => {
                    key.check_item(item)?;
                    (key, condition.as_ref())
                }
                WriteOp::Delete { key, condition } => (key, condition.as_ref()),
            };
            let current = tables.get(&key.table).and_then(|t| t.get(&key.storage_key()));
            check_condition(key, current, condition)?;
        }

        for write in writes {
            apply_write(&mut tables, write);
        }
        debug!(writes = writes.len(), "memory transact");
        Ok(())
    }
}

//! Key-value store adapter contract.
//!
//! The contract mirrors what single-item-atomic document stores offer:
//! conditional put/delete, reads by primary key, paged scans, and an atomic
//! numeric increment over nested paths. Nothing here spans two items except
//! [`KvStore::transact`], which backends may leave unsupported.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::op::{Condition, IncrementOp};

/// A stored document: attribute name to JSON value.
pub type Item = Map<String, Value>;

/// One primary-key attribute and its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyAttr {
    /// Attribute name, e.g. `owner`.
    pub name: String,
    /// Attribute value.
    pub value: String,
}

impl KeyAttr {
    /// Builds a key attribute.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Fully qualified primary key of an item: table, hash attribute and an
/// optional range attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    /// Table name.
    pub table: String,
    /// Hash (partition) attribute.
    pub hash: KeyAttr,
    /// Range (sort) attribute, for composite keys.
    pub range: Option<KeyAttr>,
}

impl ItemKey {
    /// Key with only a hash attribute.
    pub fn simple(table: impl Into<String>, hash: KeyAttr) -> Self {
        Self {
            table: table.into(),
            hash,
            range: None,
        }
    }

    /// Key with hash and range attributes.
    pub fn composite(table: impl Into<String>, hash: KeyAttr, range: KeyAttr) -> Self {
        Self {
            table: table.into(),
            hash,
            range: Some(range),
        }
    }

    /// Canonical encoding used as the physical row/map key inside a table.
    ///
    /// Values are JSON-encoded as an array so that no choice of key text can
    /// collide with another key.
    pub fn storage_key(&self) -> String {
        let parts: Vec<&str> = std::iter::once(self.hash.value.as_str())
            .chain(self.range.as_ref().map(|r| r.value.as_str()))
            .collect();
        serde_json::to_string(&parts).unwrap_or_default()
    }

    /// Checks that `item` carries every key attribute with the key's value.
    pub fn check_item(&self, item: &Item) -> StoreResult<()> {
        for attr in std::iter::once(&self.hash).chain(self.range.as_ref()) {
            match item.get(&attr.name) {
                Some(Value::String(v)) if *v == attr.value => {}
                Some(_) => {
                    return Err(StoreError::InvalidItem(format!(
                        "key attribute `{}` does not match {}",
                        attr.name, self
                    )));
                }
                None => {
                    return Err(StoreError::InvalidItem(format!(
                        "item is missing key attribute `{}`",
                        attr.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns a bare item holding only the key attributes.
    pub fn key_item(&self) -> Item {
        let mut item = Item::new();
        for attr in std::iter::once(&self.hash).chain(self.range.as_ref()) {
            item.insert(attr.name.clone(), Value::String(attr.value.clone()));
        }
        item
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}={}", self.table, self.hash.name, self.hash.value)?;
        if let Some(range) = &self.range {
            write!(f, ", {}={}", range.name, range.value)?;
        }
        f.write_str(")")
    }
}

/// One page of a table scan, in storage-key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Items in this page.
    pub items: Vec<Item>,
    /// Storage key to resume after; `None` when the scan is complete.
    pub last_key: Option<String>,
}

/// A single write inside a [`KvStore::transact`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Put `item` at `key` when `condition` holds.
    Put {
        /// Target key.
        key: ItemKey,
        /// Full item, including key attributes.
        item: Item,
        /// Optional guard.
        condition: Option<Condition>,
    },
    /// Delete `key` when `condition` holds.
    Delete {
        /// Target key.
        key: ItemKey,
        /// Optional guard.
        condition: Option<Condition>,
    },
}

/// Errors reported by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write's condition did not hold against the current item.
    #[error("conditional check failed for {key}")]
    ConditionFailed {
        /// Display form of the guarded key.
        key: String,
    },
    /// The item is malformed for its key.
    #[error("invalid item: {0}")]
    InvalidItem(String),
    /// The update expression references an unbound placeholder or is empty.
    #[error("invalid update expression: {0}")]
    InvalidExpression(String),
    /// An increment targeted a path that does not exist.
    #[error("document path `{path}` does not exist in {key}")]
    MissingPath {
        /// Display form of the target key.
        key: String,
        /// Resolved dotted path.
        path: String,
    },
    /// An increment targeted a non-numeric or non-map value.
    #[error("document path `{path}` has the wrong type in {key}")]
    TypeMismatch {
        /// Display form of the target key.
        key: String,
        /// Resolved dotted path.
        path: String,
    },
    /// A counter would exceed `u64::MAX`.
    #[error("counter overflow at `{path}` in {key}")]
    Overflow {
        /// Display form of the target key.
        key: String,
        /// Resolved dotted path.
        path: String,
    },
    /// The backend does not implement this operation.
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),
    /// SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Any other infrastructure failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the failure is an unmet write condition.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }
}

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Single-item-atomic key-value store.
///
/// Every method is a blocking request/response call. Implementations must
/// make each call atomic with respect to the one item it touches; two
/// concurrent conditional deletes of the same key must see exactly one
/// success.
pub trait KvStore: Send + Sync {
    /// Writes `item` at `key`, replacing any current item, when `condition`
    /// holds (or unconditionally when `None`).
    fn put(&self, key: &ItemKey, item: Item, condition: Option<&Condition>) -> StoreResult<()>;

    /// Reads the item at `key`.
    fn get(&self, key: &ItemKey) -> StoreResult<Option<Item>>;

    /// Removes the item at `key` when `condition` holds. Deleting an absent
    /// item without a condition is not an error.
    fn delete(&self, key: &ItemKey, condition: Option<&Condition>) -> StoreResult<()>;

    /// Applies every add action of `op` to one item, all or nothing.
    fn increment(&self, op: &IncrementOp) -> StoreResult<()>;

    /// Reads up to `limit` items of `table` whose storage key sorts after
    /// `start_after`.
    fn scan(&self, table: &str, start_after: Option<&str>, limit: usize) -> StoreResult<ScanPage>;

    /// Applies several writes atomically. Stores without multi-item
    /// transactions keep the default.
    fn transact(&self, _writes: &[WriteOp]) -> StoreResult<()> {
        Err(StoreError::Unsupported("transact"))
    }
}

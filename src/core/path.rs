use serde_json::{Map, Value};

use crate::{
    kv::{Item, ItemKey, StoreError, StoreResult},
    op::{BucketMode, IncrementOp},
};

/// Applies every action of `op` to `current`, returning the updated item.
///
/// `current` is left untouched on error so callers can discard the result
/// and keep the stored item as it was.
pub fn apply_increment(current: Option<&Item>, op: &IncrementOp) -> StoreResult<Item> {
    let actions = op.resolved_actions()?;

    let mut item = match (current, op.mode) {
        (Some(item), _) => item.clone(),
        (None, BucketMode::CreateMissing) => op.key.key_item(),
        (None, BucketMode::RequireExisting) => {
            return Err(StoreError::MissingPath {
                key: op.key.to_string(),
                path: actions
                    .first()
                    .map(|(path, _)| path.join("."))
                    .unwrap_or_default(),
            });
        }
    };

    for (path, delta) in &actions {
        add_at_path(&mut item, path, *delta, op.mode, &op.key)?;
    }
    Ok(item)
}

fn add_at_path(
    item: &mut Item,
    path: &[String],
    delta: u64,
    mode: BucketMode,
    key: &ItemKey,
) -> StoreResult<()> {
    let Some((leaf, parents)) = path.split_last() else {
        return Err(StoreError::InvalidExpression("empty document path".to_string()));
    };
    let dotted = || path.join(".");

    let mut node: &mut Map<String, Value> = item;
    for segment in parents {
        if !node.contains_key(segment.as_str()) {
            if mode == BucketMode::RequireExisting {
                return Err(StoreError::MissingPath {
                    key: key.to_string(),
                    path: dotted(),
                });
            }
            node.insert(segment.clone(), Value::Object(Map::new()));
        }
        node = match node.get_mut(segment.as_str()) {
            Some(Value::Object(child)) => child,
            _ => {
                return Err(StoreError::TypeMismatch {
                    key: key.to_string(),
                    path: dotted(),
                });
            }
        };
    }

    let current = match node.get(leaf.as_str()) {
        Some(value) => value.as_u64().ok_or_else(|| StoreError::TypeMismatch {
            key: key.to_string(),
            path: dotted(),
        })?,
        None if mode == BucketMode::CreateMissing => 0,
        None => {
            return Err(StoreError::MissingPath {
                key: key.to_string(),
                path: dotted(),
            });
        }
    };

    let next = current.checked_add(delta).ok_or_else(|| StoreError::Overflow {
        key: key.to_string(),
        path: dotted(),
    })?;
    node.insert(leaf.clone(), Value::from(next));
    Ok(())
}

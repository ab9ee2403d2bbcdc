//! Store request model: write conditions and atomic increments with
//! placeholder-bound bucket keys.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kv::{Item, ItemKey, StoreError, StoreResult};

/// Prefix marking a path segment as a placeholder name.
pub const PLACEHOLDER_SIGIL: char = '#';

/// Guard evaluated against the current item before a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// The item must currently exist.
    Exists,
    /// The item must not currently exist.
    NotExists,
    /// The item must exist and hold `value` at top-level attribute `name`.
    AttributeEquals {
        /// Attribute name.
        name: String,
        /// Expected value.
        value: Value,
    },
    /// The item must exist and equal this item exactly.
    ItemEquals(Item),
}

impl Condition {
    /// Returns true when the guard is satisfied by `current`.
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            Self::Exists => current.is_some(),
            Self::NotExists => current.is_none(),
            Self::AttributeEquals { name, value } => {
                current.and_then(|item| item.get(name)) == Some(value)
            }
            Self::ItemEquals(expected) => current == Some(expected),
        }
    }
}

/// What an increment does when its target path is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketMode {
    /// Fail the whole increment.
    #[default]
    RequireExisting,
    /// Create the item, intermediate maps and counter, starting from zero.
    CreateMissing,
}

/// One `path = path + delta` action.
///
/// Segments starting with [`PLACEHOLDER_SIGIL`] are resolved through
/// [`IncrementOp::names`]; all others are literal attribute names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAction {
    /// Path segments from the item root.
    pub path: Vec<String>,
    /// Amount added.
    pub delta: u64,
}

/// Atomic multi-path increment against a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementOp {
    /// Target item.
    pub key: ItemKey,
    /// Add actions, applied all-or-nothing.
    pub actions: Vec<AddAction>,
    /// Placeholder name to literal bucket key.
    pub names: BTreeMap<String, String>,
    /// Behaviour for absent paths.
    pub mode: BucketMode,
}

impl IncrementOp {
    /// Starts building an increment for `key`.
    pub fn builder(key: ItemKey) -> IncrementBuilder {
        IncrementBuilder::new(key)
    }

    /// Renders the expression form, e.g.
    /// `SET created = created + :v0, ownerCohorts.#oc0 = ownerCohorts.#oc0 + :v1`.
    ///
    /// Value placeholders are numbered per action; [`IncrementOp::values`]
    /// binds them to deltas the way [`IncrementOp::names`] binds bucket keys.
    pub fn expression(&self) -> String {
        let clauses: Vec<String> = self
            .actions
            .iter()
            .enumerate()
            .map(|(i, action)| {
                let path = action.path.join(".");
                format!("{path} = {path} + :v{i}")
            })
            .collect();
        format!("SET {}", clauses.join(", "))
    }

    /// Value placeholder to delta, matching [`IncrementOp::expression`].
    pub fn values(&self) -> BTreeMap<String, u64> {
        self.actions
            .iter()
            .enumerate()
            .map(|(i, action)| (format!(":v{i}"), action.delta))
            .collect()
    }

    /// Substitutes placeholders and returns literal paths with their deltas.
    pub fn resolved_actions(&self) -> StoreResult<Vec<(Vec<String>, u64)>> {
        if self.actions.is_empty() {
            return Err(StoreError::InvalidExpression(
                "increment has no actions".to_string(),
            ));
        }

        self.actions
            .iter()
            .map(|action| {
                let path = action
                    .path
                    .iter()
                    .map(|segment| self.resolve_segment(segment))
                    .collect::<StoreResult<Vec<String>>>()?;
                Ok((path, action.delta))
            })
            .collect()
    }

    fn resolve_segment(&self, segment: &str) -> StoreResult<String> {
        if !segment.starts_with(PLACEHOLDER_SIGIL) {
            return Ok(segment.to_string());
        }
        self.names.get(segment).cloned().ok_or_else(|| {
            StoreError::InvalidExpression(format!("unbound placeholder `{segment}`"))
        })
    }
}

/// Builder that binds every dynamic bucket key to a fresh placeholder.
#[derive(Debug)]
pub struct IncrementBuilder {
    key: ItemKey,
    actions: Vec<AddAction>,
    names: BTreeMap<String, String>,
    next_by_prefix: HashMap<String, usize>,
    bound: HashMap<(String, String), usize>,
    mode: BucketMode,
}

impl IncrementBuilder {
    fn new(key: ItemKey) -> Self {
        Self {
            key,
            actions: Vec::new(),
            names: BTreeMap::new(),
            next_by_prefix: HashMap::new(),
            bound: HashMap::new(),
            mode: BucketMode::default(),
        }
    }

    /// Sets the absent-path behaviour.
    pub fn mode(mut self, mode: BucketMode) -> Self {
        self.mode = mode;
        self
    }

    /// Adds `delta` to top-level counter `field`. Repeated fields merge,
    /// saturating at `u64::MAX`.
    pub fn add(mut self, field: &str, delta: u64) -> Self {
        let path = vec![field.to_string()];
        if let Some(action) = self.actions.iter_mut().find(|a| a.path == path) {
            action.delta = action.delta.saturating_add(delta);
        } else {
            self.actions.push(AddAction { path, delta });
        }
        self
    }

    /// Adds `delta` to `map[bucket]`, referencing `bucket` through a
    /// placeholder named `#<prefix><n>`.
    ///
    /// A bucket already referenced in the same map within this increment
    /// is merged into its existing action.
    pub fn add_bucket(mut self, map: &str, prefix: &str, bucket: &str, delta: u64) -> Self {
        let slot = (map.to_string(), bucket.to_string());
        if let Some(&idx) = self.bound.get(&slot) {
            if let Some(action) = self.actions.get_mut(idx) {
                action.delta = action.delta.saturating_add(delta);
            }
            return self;
        }

        let counter = self.next_by_prefix.entry(prefix.to_string()).or_insert(0);
        let placeholder = format!("{PLACEHOLDER_SIGIL}{prefix}{counter}");
        *counter += 1;

        self.names.insert(placeholder.clone(), bucket.to_string());
        self.bound.insert(slot, self.actions.len());
        self.actions.push(AddAction {
            path: vec![map.to_string(), placeholder],
            delta,
        });
        self
    }

    /// Finishes the increment.
    pub fn build(self) -> IncrementOp {
        IncrementOp {
            key: self.key,
            actions: self.actions,
            names: self.names,
            mode: self.mode,
        }
    }
}

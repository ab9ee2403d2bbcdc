//! Construction-time configuration.
//!
//! Everything a scheduler needs is passed in explicitly; nothing is read
//! from process-wide state. All types deserialize from JSON with defaults
//! for omitted fields.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::store::MemoryStore,
    kv::{KvStore, StoreResult},
    op::BucketMode,
    persist::sqlite::SqliteStore,
    runtime::handle::RuntimeConfig,
    types::{Cohort, DOJO_COHORTS, DOJO_SLOT_TYPES, SlotType},
};

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed JSON or wrong field types.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// Semantically invalid values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Physical table names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableNames {
    /// Users table.
    pub users: String,
    /// Availabilities table, also holding the availability statistics.
    pub availabilities: String,
    /// Meetings table, also holding the meeting statistics.
    pub meetings: String,
}

impl TableNames {
    /// `{stage}-users`, `{stage}-availabilities`, `{stage}-meetings`.
    pub fn for_stage(stage: &str) -> Self {
        Self {
            users: format!("{stage}-users"),
            availabilities: format!("{stage}-availabilities"),
            meetings: format!("{stage}-meetings"),
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::for_stage("dev")
    }
}

/// Known bucket keys used when seeding statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vocabulary {
    /// Cohort tags.
    pub cohorts: BTreeSet<Cohort>,
    /// Slot-type tags.
    pub slot_types: BTreeSet<SlotType>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            cohorts: DOJO_COHORTS.iter().copied().map(Cohort::from).collect(),
            slot_types: DOJO_SLOT_TYPES.iter().copied().map(SlotType::from).collect(),
        }
    }
}

/// Statistics engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsConfig {
    /// Behaviour when an increment hits an unseeded bucket.
    pub bucket_mode: BucketMode,
    /// Bucket keys seeded at startup.
    pub vocabulary: Vocabulary,
    /// Seed both aggregates when the runtime starts.
    pub seed_on_start: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bucket_mode: BucketMode::RequireExisting,
            vocabulary: Vocabulary::default(),
            seed_on_start: true,
        }
    }
}

/// How an availability is converted into a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingMode {
    /// Conditional delete, then insert. Works on any single-item store; a
    /// crash in between loses the slot.
    #[default]
    DeleteThenInsert,
    /// Delete and insert in one store transaction.
    Transactional,
}

/// Store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local [`MemoryStore`].
    #[default]
    Memory,
    /// [`SqliteStore`] at `path`.
    Sqlite {
        /// Database file.
        path: PathBuf,
    },
}

impl StoreBackend {
    /// Opens the configured backend.
    pub fn open(&self) -> StoreResult<Arc<dyn KvStore>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryStore::new())),
            Self::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
        }
    }
}

/// Top-level scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Storage backend.
    pub store: StoreBackend,
    /// Table names.
    pub tables: TableNames,
    /// Statistics settings.
    pub stats: StatsConfig,
    /// Booking strategy.
    pub booking_mode: BookingMode,
    /// Runtime queue and channel sizes.
    pub runtime: RuntimeConfig,
    /// Users written per rating-refresh batch.
    pub ratings_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::default(),
            tables: TableNames::default(),
            stats: StatsConfig::default(),
            booking_mode: BookingMode::default(),
            runtime: RuntimeConfig::default(),
            ratings_batch_size: 25,
        }
    }
}

impl SchedulerConfig {
    /// Defaults with tables for `stage`.
    pub fn for_stage(stage: &str) -> Self {
        Self {
            tables: TableNames::for_stage(stage),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tables = [&self.tables.users, &self.tables.availabilities, &self.tables.meetings];
        if tables.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid("table names must not be empty".to_string()));
        }
        if self.tables.users == self.tables.availabilities
            || self.tables.users == self.tables.meetings
            || self.tables.availabilities == self.tables.meetings
        {
            return Err(ConfigError::Invalid("table names must be distinct".to_string()));
        }
        if self.runtime.stats_queue_bound == 0 || self.runtime.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "runtime queue sizes must be positive".to_string(),
            ));
        }
        if self.ratings_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "ratings batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

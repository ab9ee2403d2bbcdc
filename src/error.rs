//! Domain error taxonomy.

use thiserror::Error;

use crate::kv::StoreError;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or ineligible request; do not retry.
    Validation,
    /// The targeted item was already removed; pick another slot.
    Conflict,
    /// Referenced entity is absent.
    NotFound,
    /// Infrastructure failure; retrying is the caller's call.
    Transient,
}

/// Errors surfaced by repository and booking operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Request rejected before touching the store.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Existence condition failed.
    #[error("{entity} {key} {reason}")]
    Conflict {
        /// Entity kind, e.g. `availability`.
        entity: &'static str,
        /// Display form of the key.
        key: String,
        /// Why the write lost, e.g. `does not exist or is already booked`.
        reason: &'static str,
    },
    /// Entity not found on read.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Display form of the key.
        key: String,
    },
    /// Store call failed for infrastructure reasons.
    #[error("temporary server error: {0}")]
    Transient(#[source] StoreError),
    /// The availability was consumed but its meeting could not be written.
    #[error("availability {availability} consumed but meeting {meeting} was not saved: {source}")]
    SlotLost {
        /// Display form of the removed availability key.
        availability: String,
        /// Id of the meeting that failed to persist.
        meeting: String,
        /// Why the meeting write failed.
        #[source]
        source: Box<SchedulerError>,
    },
}

impl SchedulerError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transient(_) | Self::SlotLost { .. } => ErrorKind::Transient,
        }
    }

    /// True for [`ErrorKind::Conflict`].
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Maps a store failure on a conditional write of `entity`.
    pub(crate) fn from_write(entity: &'static str, reason: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::ConditionFailed { key } => Self::Conflict { entity, key, reason },
            other => Self::from(other),
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ConditionFailed { key } => Self::Conflict {
                entity: "item",
                key,
                reason: "was modified concurrently",
            },
            StoreError::InvalidItem(msg) | StoreError::InvalidExpression(msg) => Self::Validation(msg),
            other => Self::Transient(other),
        }
    }
}

/// Result alias for domain operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

//! Lifecycle counters aggregated into one record per table.
//!
//! Each event becomes one [`IncrementOp`] per aggregate it touches. Scalar
//! counters and their per-cohort / per-type buckets move together inside a
//! single store call, and every bucket key is bound through a placeholder so
//! that arbitrary tag text never reaches the expression itself.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::Vocabulary,
    error::SchedulerResult,
    kv::{ItemKey, KvStore, StoreError, StoreResult},
    model::{Availability, Meeting},
    op::{BucketMode, IncrementOp},
    repository::{Repository, unmarshal},
    types::{Cohort, SlotType},
};

const CREATED: &str = "created";
const DELETED: &str = "deleted";
const BOOKED: &str = "booked";
const CANCELED: &str = "canceled";
const OWNER_COHORTS: &str = "ownerCohorts";
const DELETER_COHORTS: &str = "deleterCohorts";
const BOOKABLE_COHORTS: &str = "bookableCohorts";
const PARTICIPANT_COHORTS: &str = "participantCohorts";
const CANCELER_COHORTS: &str = "cancelerCohorts";
const TYPES: &str = "types";

/// Aggregate counters for availabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AvailabilityStats {
    /// Availabilities created.
    pub created: u64,
    /// Availabilities deleted by their owner.
    pub deleted: u64,
    /// Availabilities consumed by a booking.
    pub booked: u64,
    /// Creations by owner cohort.
    pub owner_cohorts: BTreeMap<String, u64>,
    /// Deletions by deleter cohort.
    pub deleter_cohorts: BTreeMap<String, u64>,
    /// Creations bookable by each cohort.
    pub bookable_cohorts: BTreeMap<String, u64>,
    /// Creations offering each slot type.
    pub types: BTreeMap<String, u64>,
}

/// Aggregate counters for meetings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeetingStats {
    /// Meetings created.
    pub created: u64,
    /// Meetings canceled.
    pub canceled: u64,
    /// Meetings by owner cohort.
    pub owner_cohorts: BTreeMap<String, u64>,
    /// Meetings by participant cohort.
    pub participant_cohorts: BTreeMap<String, u64>,
    /// Cancellations by canceler cohort.
    pub canceler_cohorts: BTreeMap<String, u64>,
    /// Meetings by slot type.
    pub types: BTreeMap<String, u64>,
}

/// Lifecycle event feeding the aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsEvent {
    /// An availability was published.
    AvailabilityCreated {
        /// Owner cohort.
        owner_cohort: Cohort,
        /// Eligible cohorts.
        cohorts: BTreeSet<Cohort>,
        /// Offered slot types.
        types: BTreeSet<SlotType>,
    },
    /// An owner deleted an availability.
    AvailabilityDeleted {
        /// Cohort of the deleting user.
        deleter_cohort: Cohort,
    },
    /// An availability was converted into a meeting.
    AvailabilityBooked {
        /// Owner cohort.
        owner_cohort: Cohort,
        /// Participant cohort.
        participant_cohort: Cohort,
        /// Agreed slot type.
        slot_type: SlotType,
    },
    /// A meeting was canceled.
    MeetingCanceled {
        /// Cohort of the canceling user.
        canceler_cohort: Cohort,
    },
}

impl StatsEvent {
    /// Event for a newly published availability.
    pub fn created(availability: &Availability) -> Self {
        Self::AvailabilityCreated {
            owner_cohort: availability.owner_cohort.clone(),
            cohorts: availability.cohorts.clone(),
            types: availability.types.clone(),
        }
    }

    /// Event for a booking that produced `meeting`.
    pub fn booked(meeting: &Meeting) -> Self {
        Self::AvailabilityBooked {
            owner_cohort: meeting.owner_cohort.clone(),
            participant_cohort: meeting.participant_cohort.clone(),
            slot_type: meeting.slot_type.clone(),
        }
    }

    /// Short name for logs and runtime events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AvailabilityCreated { .. } => "availability_created",
            Self::AvailabilityDeleted { .. } => "availability_deleted",
            Self::AvailabilityBooked { .. } => "availability_booked",
            Self::MeetingCanceled { .. } => "meeting_canceled",
        }
    }
}

/// Destination for statistics events.
///
/// Recording is best-effort: implementations log failures and never report
/// them back to the caller.
pub trait StatsSink: Send + Sync {
    /// Records `event`, or logs why it could not be recorded.
    fn record(&self, event: StatsEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn record(&self, _event: StatsEvent) {}
}

/// Applies statistics events directly against the store.
#[derive(Clone)]
pub struct StatsRecorder {
    store: Arc<dyn KvStore>,
    availability_key: ItemKey,
    meeting_key: ItemKey,
    mode: BucketMode,
}

impl StatsRecorder {
    /// Recorder writing to the aggregates addressed by `repo`.
    pub fn new(repo: &Repository, mode: BucketMode) -> Self {
        Self {
            store: Arc::clone(repo.store()),
            availability_key: repo.availability_stats_key(),
            meeting_key: repo.meeting_stats_key(),
            mode,
        }
    }

    /// Builds the increments for `event`, one per aggregate touched.
    pub fn increments_for(&self, event: &StatsEvent) -> Vec<IncrementOp> {
        let availability = || IncrementOp::builder(self.availability_key.clone()).mode(self.mode);
        let meeting = || IncrementOp::builder(self.meeting_key.clone()).mode(self.mode);

        match event {
            StatsEvent::AvailabilityCreated {
                owner_cohort,
                cohorts,
                types,
            } => {
                let mut op = availability()
                    .add(CREATED, 1)
                    .add_bucket(OWNER_COHORTS, "oc", owner_cohort.as_str(), 1);
                for cohort in cohorts {
                    op = op.add_bucket(BOOKABLE_COHORTS, "bc", cohort.as_str(), 1);
                }
                for slot_type in types {
                    op = op.add_bucket(TYPES, "t", slot_type.as_str(), 1);
                }
                vec![op.build()]
            }
            StatsEvent::AvailabilityDeleted { deleter_cohort } => vec![
                availability()
                    .add(DELETED, 1)
                    .add_bucket(DELETER_COHORTS, "dc", deleter_cohort.as_str(), 1)
                    .build(),
            ],
            StatsEvent::AvailabilityBooked {
                owner_cohort,
                participant_cohort,
                slot_type,
            } => vec![
                availability().add(BOOKED, 1).build(),
                meeting()
                    .add(CREATED, 1)
                    .add_bucket(OWNER_COHORTS, "oc", owner_cohort.as_str(), 1)
                    .add_bucket(PARTICIPANT_COHORTS, "pc", participant_cohort.as_str(), 1)
                    .add_bucket(TYPES, "t", slot_type.as_str(), 1)
                    .build(),
            ],
            StatsEvent::MeetingCanceled { canceler_cohort } => vec![
                meeting()
                    .add(CANCELED, 1)
                    .add_bucket(CANCELER_COHORTS, "cc", canceler_cohort.as_str(), 1)
                    .build(),
            ],
        }
    }

    /// Applies `event`. Every increment is attempted; the first failure is
    /// returned.
    pub fn apply(&self, event: &StatsEvent) -> StoreResult<()> {
        let mut first_err: Option<StoreError> = None;
        for op in self.increments_for(event) {
            match self.store.increment(&op) {
                Ok(()) => debug!(event = event.label(), expression = %op.expression(), "statistics updated"),
                Err(err) => {
                    warn!(
                        event = event.label(),
                        key = %op.key,
                        expression = %op.expression(),
                        error = %err,
                        "statistics increment failed"
                    );
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Adds every scalar counter and every bucket of `vocabulary` to both
    /// aggregates at zero, creating them when absent. Existing counts are
    /// kept, so seeding is safe to repeat.
    pub fn seed(&self, vocabulary: &Vocabulary) -> StoreResult<()> {
        let mut availability = IncrementOp::builder(self.availability_key.clone())
            .mode(BucketMode::CreateMissing)
            .add(CREATED, 0)
            .add(DELETED, 0)
            .add(BOOKED, 0);
        let mut meeting = IncrementOp::builder(self.meeting_key.clone())
            .mode(BucketMode::CreateMissing)
            .add(CREATED, 0)
            .add(CANCELED, 0);

        for cohort in &vocabulary.cohorts {
            let tag = cohort.as_str();
            availability = availability
                .add_bucket(OWNER_COHORTS, "oc", tag, 0)
                .add_bucket(DELETER_COHORTS, "dc", tag, 0)
                .add_bucket(BOOKABLE_COHORTS, "bc", tag, 0);
            meeting = meeting
                .add_bucket(OWNER_COHORTS, "oc", tag, 0)
                .add_bucket(PARTICIPANT_COHORTS, "pc", tag, 0)
                .add_bucket(CANCELER_COHORTS, "cc", tag, 0);
        }
        for slot_type in &vocabulary.slot_types {
            availability = availability.add_bucket(TYPES, "t", slot_type.as_str(), 0);
            meeting = meeting.add_bucket(TYPES, "t", slot_type.as_str(), 0);
        }

        self.store.increment(&availability.build())?;
        self.store.increment(&meeting.build())?;
        debug!(
            cohorts = vocabulary.cohorts.len(),
            slot_types = vocabulary.slot_types.len(),
            "statistics seeded"
        );
        Ok(())
    }

    /// Reads the availability aggregate; zero when never written.
    pub fn availability_stats(&self) -> SchedulerResult<AvailabilityStats> {
        match self.store.get(&self.availability_key)? {
            Some(item) => unmarshal(item),
            None => Ok(AvailabilityStats::default()),
        }
    }

    /// Reads the meeting aggregate; zero when never written.
    pub fn meeting_stats(&self) -> SchedulerResult<MeetingStats> {
        match self.store.get(&self.meeting_key)? {
            Some(item) => unmarshal(item),
            None => Ok(MeetingStats::default()),
        }
    }
}

impl StatsSink for StatsRecorder {
    fn record(&self, event: StatsEvent) {
        // Failures are already logged per increment.
        let _ = self.apply(&event);
    }
}

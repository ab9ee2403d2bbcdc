//! Availability lifecycle: publish, book, delete, and meeting cancellation.
//!
//! The booking decision point is the existence-conditioned delete of the
//! availability. The store lets exactly one of any number of concurrent
//! deletes of the same key succeed; only that caller goes on to write a
//! meeting. Statistics are handed to a [`StatsSink`] after the primary write
//! and can never change its outcome.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    config::BookingMode,
    error::{SchedulerError, SchedulerResult},
    kv::StoreError,
    model::{Availability, Meeting, MeetingRequest, MeetingStatus},
    repository::Repository,
    types::{Cohort, MeetingId},
};

use super::stats::{StatsEvent, StatsSink};

/// Checks a new availability before it is published.
pub fn validate_availability(availability: &Availability) -> SchedulerResult<()> {
    if availability.cohorts.is_empty() {
        return Err(SchedulerError::validation(
            "availability must be bookable by at least one cohort",
        ));
    }
    if availability.types.is_empty() {
        return Err(SchedulerError::validation(
            "availability must offer at least one slot type",
        ));
    }
    if availability.start_time >= availability.end_time {
        return Err(SchedulerError::validation(
            "availability must start before it ends",
        ));
    }
    Ok(())
}

/// Caller-side eligibility check for a booking request.
///
/// [`BookingProtocol::book_availability`] does not repeat these checks.
pub fn validate_booking(availability: &Availability, request: &MeetingRequest) -> SchedulerResult<()> {
    if request.participant == availability.owner {
        return Err(SchedulerError::validation("owners cannot book their own availability"));
    }
    if !availability.types.contains(&request.slot_type) {
        return Err(SchedulerError::validation(format!(
            "slot type `{}` is not offered",
            request.slot_type
        )));
    }
    if !availability.cohorts.contains(&request.participant_cohort) {
        return Err(SchedulerError::validation(format!(
            "cohort `{}` is not eligible to book this availability",
            request.participant_cohort
        )));
    }
    Ok(())
}

/// Booking protocol over a [`Repository`].
#[derive(Clone)]
pub struct BookingProtocol {
    repo: Repository,
    stats: Arc<dyn StatsSink>,
    mode: BookingMode,
}

impl BookingProtocol {
    /// Protocol reporting lifecycle events to `stats`.
    pub fn new(repo: Repository, stats: Arc<dyn StatsSink>, mode: BookingMode) -> Self {
        Self { repo, stats, mode }
    }

    /// Repository used by this protocol.
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Publishes `availability`.
    pub fn create_availability(&self, availability: Availability) -> SchedulerResult<Availability> {
        validate_availability(&availability)?;
        self.repo.insert_availability(&availability)?;
        info!(owner = %availability.owner, id = %availability.id, "availability created");
        self.stats.record(StatsEvent::created(&availability));
        Ok(availability)
    }

    /// Converts `availability` into a meeting for `request`.
    ///
    /// Returns a conflict when the availability was already booked or
    /// deleted; the caller should re-fetch and choose another slot. Nothing
    /// is retried here.
    ///
    /// The meeting id is checked while the availability is still live, so a
    /// reserved, blank or already used id leaves the slot untouched.
    pub fn book_availability(
        &self,
        availability: &Availability,
        request: MeetingRequest,
    ) -> SchedulerResult<Meeting> {
        let meeting = Meeting::from_booking(availability, request);
        if self.repo.meeting_exists(&meeting.id)? {
            return Err(SchedulerError::Conflict {
                entity: "meeting",
                key: meeting.id.clone(),
                reason: "already exists",
            });
        }

        match self.mode {
            BookingMode::DeleteThenInsert => self.delete_then_insert(availability, &meeting)?,
            BookingMode::Transactional => {
                match self.repo.swap_availability_for_meeting(availability, &meeting) {
                    Ok(()) => {}
                    Err(SchedulerError::Transient(StoreError::Unsupported(_))) => {
                        warn!("store has no transactions, booking with delete then insert");
                        self.delete_then_insert(availability, &meeting)?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        info!(
            owner = %meeting.owner,
            availability = %meeting.availability_id,
            meeting = %meeting.id,
            participant = %meeting.participant,
            "availability booked"
        );
        self.stats.record(StatsEvent::booked(&meeting));
        Ok(meeting)
    }

    fn delete_then_insert(&self, availability: &Availability, meeting: &Meeting) -> SchedulerResult<()> {
        let availability_key = self.repo.availability_key(&availability.owner, &availability.id)?;
        // Only the winner of this delete reaches the insert below.
        self.repo
            .delete_availability(&availability.owner, &availability.id)?;

        if let Err(err) = self.repo.insert_meeting(meeting) {
            error!(
                availability = %availability_key,
                meeting = %meeting.id,
                error = %err,
                "availability consumed but meeting not saved; slot lost"
            );
            return Err(SchedulerError::SlotLost {
                availability: availability_key.to_string(),
                meeting: meeting.id.clone(),
                source: Box::new(err),
            });
        }
        Ok(())
    }

    /// Owner-initiated removal of a live availability.
    ///
    /// A slot that is already gone, booked or deleted, is a conflict.
    pub fn delete_availability(&self, owner: &str, id: &str, deleter_cohort: &Cohort) -> SchedulerResult<()> {
        self.repo.delete_availability(owner, id)?;
        info!(%owner, %id, "availability deleted");
        self.stats.record(StatsEvent::AvailabilityDeleted {
            deleter_cohort: deleter_cohort.clone(),
        });
        Ok(())
    }

    /// Cancels a scheduled meeting on behalf of its owner or participant.
    pub fn cancel_meeting(
        &self,
        meeting_id: &MeetingId,
        canceler: &str,
        canceler_cohort: &Cohort,
    ) -> SchedulerResult<Meeting> {
        let meeting = self.repo.get_meeting(meeting_id)?;
        if canceler != meeting.owner && canceler != meeting.participant {
            return Err(SchedulerError::validation(format!(
                "`{canceler}` is not part of meeting {meeting_id}"
            )));
        }
        if meeting.status == MeetingStatus::Canceled {
            return Err(SchedulerError::Conflict {
                entity: "meeting",
                key: meeting_id.clone(),
                reason: "is already canceled",
            });
        }

        let canceled = self.repo.mark_meeting_canceled(&meeting)?;
        info!(meeting = %meeting_id, %canceler, "meeting canceled");
        self.stats.record(StatsEvent::MeetingCanceled {
            canceler_cohort: canceler_cohort.clone(),
        });
        Ok(canceled)
    }
}

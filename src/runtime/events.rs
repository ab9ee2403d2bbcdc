//! Runtime event stream payloads.

use crate::types::{AvailabilityId, MeetingId, Username};

/// Events broadcast by the scheduler runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// An availability was published.
    AvailabilityCreated {
        /// Owner username.
        owner: Username,
        /// Availability id.
        id: AvailabilityId,
    },
    /// An availability was consumed by a booking.
    AvailabilityBooked {
        /// Owner username.
        owner: Username,
        /// Availability id.
        id: AvailabilityId,
        /// Meeting that replaced it.
        meeting_id: MeetingId,
    },
    /// An owner deleted an availability.
    AvailabilityDeleted {
        /// Owner username.
        owner: Username,
        /// Availability id.
        id: AvailabilityId,
    },
    /// A meeting was canceled.
    MeetingCanceled {
        /// Meeting id.
        meeting_id: MeetingId,
    },
    /// A statistics event was applied.
    StatsRecorded {
        /// Event label.
        event: &'static str,
    },
    /// A statistics event failed and was discarded.
    StatsFailed {
        /// Event label.
        event: &'static str,
    },
    /// A statistics event was dropped because the queue was full or closed.
    StatsDropped {
        /// Event label.
        event: &'static str,
    },
}

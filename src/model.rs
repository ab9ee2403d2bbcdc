//! User, availability and meeting records.
//!
//! Field names are marshaled in camelCase. Optional fields are omitted from
//! stored items when unset rather than written as empty or zero values.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AvailabilityId, Cohort, MeetingId, RatingSystem, SlotType, Username};

/// Registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique username, the primary key.
    pub username: Username,
    /// Name shown to other users.
    pub display_name: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Current peer-skill cohort.
    pub dojo_cohort: Cohort,
    /// Chess.com username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chesscom_username: Option<String>,
    /// Lichess username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lichess_username: Option<String>,
    /// FIDE player id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fide_id: Option<String>,
    /// US Chess member id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uscf_id: Option<String>,
    /// ECF rating code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecf_id: Option<String>,
    /// Last known Chess.com rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chesscom_rating: Option<u32>,
    /// Last known Lichess rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_lichess_rating: Option<u32>,
    /// Last known FIDE rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_fide_rating: Option<u32>,
    /// Last known US Chess rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_uscf_rating: Option<u32>,
    /// Last known ECF rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ecf_rating: Option<u32>,
}

impl User {
    /// New user with no linked rating accounts.
    pub fn new(username: impl Into<Username>, display_name: impl Into<String>, dojo_cohort: Cohort) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            email: None,
            dojo_cohort,
            chesscom_username: None,
            lichess_username: None,
            fide_id: None,
            uscf_id: None,
            ecf_id: None,
            current_chesscom_rating: None,
            current_lichess_rating: None,
            current_fide_rating: None,
            current_uscf_rating: None,
            current_ecf_rating: None,
        }
    }

    /// Linked account for `system`, if set and not blank.
    pub fn account(&self, system: RatingSystem) -> Option<&str> {
        let raw = match system {
            RatingSystem::Chesscom => self.chesscom_username.as_deref(),
            RatingSystem::Lichess => self.lichess_username.as_deref(),
            RatingSystem::Fide => self.fide_id.as_deref(),
            RatingSystem::Uscf => self.uscf_id.as_deref(),
            RatingSystem::Ecf => self.ecf_id.as_deref(),
        };
        raw.map(str::trim).filter(|s| !s.is_empty())
    }

    /// Last known rating for `system`.
    pub fn rating(&self, system: RatingSystem) -> Option<u32> {
        match system {
            RatingSystem::Chesscom => self.current_chesscom_rating,
            RatingSystem::Lichess => self.current_lichess_rating,
            RatingSystem::Fide => self.current_fide_rating,
            RatingSystem::Uscf => self.current_uscf_rating,
            RatingSystem::Ecf => self.current_ecf_rating,
        }
    }

    /// Overwrites the last known rating for `system`.
    pub fn set_rating(&mut self, system: RatingSystem, rating: Option<u32>) {
        let slot = match system {
            RatingSystem::Chesscom => &mut self.current_chesscom_rating,
            RatingSystem::Lichess => &mut self.current_lichess_rating,
            RatingSystem::Fide => &mut self.current_fide_rating,
            RatingSystem::Uscf => &mut self.current_uscf_rating,
            RatingSystem::Ecf => &mut self.current_ecf_rating,
        };
        *slot = rating;
    }
}

/// Sparse profile edit where each `Some` field overwrites the user value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPatch {
    /// Optional replacement for the display name.
    pub display_name: Option<String>,
    /// Optional replacement for the email.
    pub email: Option<String>,
    /// Optional replacement for the cohort.
    pub dojo_cohort: Option<Cohort>,
    /// Optional replacement for the Chess.com username.
    pub chesscom_username: Option<String>,
    /// Optional replacement for the Lichess username.
    pub lichess_username: Option<String>,
    /// Optional replacement for the FIDE id.
    pub fide_id: Option<String>,
    /// Optional replacement for the USCF id.
    pub uscf_id: Option<String>,
    /// Optional replacement for the ECF id.
    pub ecf_id: Option<String>,
}

impl UserPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `user`.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = &self.display_name {
            user.display_name = v.clone();
        }
        if let Some(v) = &self.email {
            user.email = Some(v.clone());
        }
        if let Some(v) = &self.dojo_cohort {
            user.dojo_cohort = v.clone();
        }
        if let Some(v) = &self.chesscom_username {
            user.chesscom_username = Some(v.clone());
        }
        if let Some(v) = &self.lichess_username {
            user.lichess_username = Some(v.clone());
        }
        if let Some(v) = &self.fide_id {
            user.fide_id = Some(v.clone());
        }
        if let Some(v) = &self.uscf_id {
            user.uscf_id = Some(v.clone());
        }
        if let Some(v) = &self.ecf_id {
            user.ecf_id = Some(v.clone());
        }
    }
}

/// Open, bookable slot published by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    /// Username of the publishing owner; hash key.
    pub owner: Username,
    /// Identifier unique per owner; range key.
    pub id: AvailabilityId,
    /// Owner's cohort at publication time.
    pub owner_cohort: Cohort,
    /// Cohorts allowed to book this slot.
    pub cohorts: BTreeSet<Cohort>,
    /// Slot types on offer.
    pub types: BTreeSet<SlotType>,
    /// Slot start.
    pub start_time: DateTime<Utc>,
    /// Slot end.
    pub end_time: DateTime<Utc>,
    /// Where the meeting takes place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Free-form notes from the owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Lifecycle state of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingStatus {
    /// Booked and upcoming.
    Scheduled,
    /// Canceled by either side.
    Canceled,
}

impl MeetingStatus {
    /// Stored representation, as used in write conditions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Canceled => "CANCELED",
        }
    }
}

/// Confirmed one-on-one booking created by consuming an availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    /// Meeting identifier; hash key.
    pub id: MeetingId,
    /// Owner of the consumed availability.
    pub owner: Username,
    /// Owner's cohort taken from the availability.
    pub owner_cohort: Cohort,
    /// Id of the consumed availability.
    pub availability_id: AvailabilityId,
    /// Booking user.
    pub participant: Username,
    /// Booking user's cohort.
    pub participant_cohort: Cohort,
    /// Agreed slot type.
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    /// Meeting start.
    pub start_time: DateTime<Utc>,
    /// Meeting end.
    pub end_time: DateTime<Utc>,
    /// Where the meeting takes place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Notes carried over from the availability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current lifecycle state.
    pub status: MeetingStatus,
}

/// Booking payload supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRequest {
    /// Booking user.
    pub participant: Username,
    /// Booking user's cohort.
    pub participant_cohort: Cohort,
    /// Chosen slot type.
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    /// Caller-chosen meeting id; a random UUID is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<MeetingId>,
}

impl MeetingRequest {
    /// Request with a generated meeting id.
    pub fn new(participant: impl Into<Username>, participant_cohort: Cohort, slot_type: SlotType) -> Self {
        Self {
            participant: participant.into(),
            participant_cohort,
            slot_type,
            meeting_id: None,
        }
    }
}

impl Meeting {
    /// Materializes the meeting that replaces `availability`.
    pub fn from_booking(availability: &Availability, request: MeetingRequest) -> Self {
        Self {
            id: request
                .meeting_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            owner: availability.owner.clone(),
            owner_cohort: availability.owner_cohort.clone(),
            availability_id: availability.id.clone(),
            participant: request.participant,
            participant_cohort: request.participant_cohort,
            slot_type: request.slot_type,
            start_time: availability.start_time,
            end_time: availability.end_time,
            location: availability.location.clone(),
            description: availability.description.clone(),
            status: MeetingStatus::Scheduled,
        }
    }
}

//! Shared primitive keys and dimension tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary key of a user.
pub type Username = String;
/// Per-owner availability identifier.
pub type AvailabilityId = String;
/// Meeting identifier.
pub type MeetingId = String;

/// Reserved key value addressing the statistics aggregate of a table.
pub const STATISTICS_KEY: &str = "STATISTICS";

/// Cohorts known at setup time, used to seed statistics buckets.
pub const DOJO_COHORTS: &[&str] = &[
    "0-300",
    "300-400",
    "400-500",
    "500-600",
    "600-700",
    "700-800",
    "800-900",
    "900-1000",
    "1000-1100",
    "1100-1200",
    "1200-1300",
    "1300-1400",
    "1400-1500",
    "1500-1600",
    "1600-1700",
    "1700-1800",
    "1800-1900",
    "1900-2000",
    "2000-2100",
    "2100-2200",
    "2200-2300",
    "2300-2400",
    "2400+",
];

/// Slot types known at setup time, used to seed statistics buckets.
pub const DOJO_SLOT_TYPES: &[&str] = &[
    "MIDDLEGAME_SPARRING",
    "ENDGAME_SPARRING",
    "ROOK_ENDGAME_PROGRESSION",
    "CLASSICAL_GAME",
    "OPENING",
    "ANALYZE_OWN_GAME",
    "ANALYZE_CLASSICAL_GAME",
    "GENERAL_REVIEW",
];

/// Peer-skill bucket tag.
///
/// Cohorts come from an open vocabulary, so the tag is kept as free text and
/// never interpreted beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cohort(String);

impl Cohort {
    /// Wraps a cohort tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the raw tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Cohort {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of session offered by an availability (sparring, game review, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotType(String);

impl SlotType {
    /// Wraps a slot-type tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the raw tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SlotType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External rating site tracked on a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingSystem {
    /// Chess.com, keyed by username.
    Chesscom,
    /// Lichess, keyed by username.
    Lichess,
    /// FIDE, keyed by player id.
    Fide,
    /// US Chess, keyed by member id.
    Uscf,
    /// English Chess Federation, keyed by rating code.
    Ecf,
}

impl RatingSystem {
    /// Every tracked system, in refresh order.
    pub const ALL: [RatingSystem; 5] = [
        RatingSystem::Chesscom,
        RatingSystem::Lichess,
        RatingSystem::Fide,
        RatingSystem::Uscf,
        RatingSystem::Ecf,
    ];
}

impl fmt::Display for RatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chesscom => "chesscom",
            Self::Lichess => "lichess",
            Self::Fide => "fide",
            Self::Uscf => "uscf",
            Self::Ecf => "ecf",
        };
        f.write_str(name)
    }
}

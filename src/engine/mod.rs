//! Booking protocol and statistics aggregation.

/// Availability booking, deletion and meeting cancellation.
pub mod booking;
/// Lifecycle counters and best-effort statistics sinks.
pub mod stats;

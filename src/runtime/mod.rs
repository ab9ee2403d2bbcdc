//! Async scheduler runtime and event stream APIs.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle, blocking-call bridge and statistics worker.
pub mod handle;

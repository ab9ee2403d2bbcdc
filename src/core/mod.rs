//! In-memory store adapter and document-path helpers.

/// Nested document path updates shared by every backend.
pub mod path;
/// Mutex-guarded in-memory key-value store.
pub mod store;

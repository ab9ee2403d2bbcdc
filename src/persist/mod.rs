//! Durable store adapters.

/// SQLite-backed [`crate::kv::KvStore`].
pub mod sqlite;

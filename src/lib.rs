//! Availability booking and lifecycle statistics over a key-value store that
//! only guarantees single-item atomicity.
//!
//! # Examples
//!
//! Synchronous usage with [`engine::booking::BookingProtocol`]:
//! ```
//! use std::sync::Arc;
//!
//! use chrono::{TimeZone, Utc};
//! use slotbook::{
//!     config::{BookingMode, TableNames},
//!     core::store::MemoryStore,
//!     engine::{booking::BookingProtocol, stats::NoopStats},
//!     model::{Availability, MeetingRequest},
//!     repository::Repository,
//!     types::{Cohort, SlotType},
//! };
//!
//! let repo = Repository::new(Arc::new(MemoryStore::new()), TableNames::for_stage("test"));
//! let protocol = BookingProtocol::new(repo, Arc::new(NoopStats), BookingMode::default());
//!
//! let slot = protocol.create_availability(Availability {
//!     owner: "alice".to_string(),
//!     id: "a1".to_string(),
//!     owner_cohort: Cohort::from("1500-1600"),
//!     cohorts: [Cohort::from("1400-1500")].into(),
//!     types: [SlotType::from("OPENING")].into(),
//!     start_time: Utc.with_ymd_and_hms(2026, 1, 1, 18, 0, 0).unwrap(),
//!     end_time: Utc.with_ymd_and_hms(2026, 1, 1, 19, 0, 0).unwrap(),
//!     location: None,
//!     description: None,
//! }).expect("create");
//!
//! let request = MeetingRequest::new("bob", Cohort::from("1400-1500"), SlotType::from("OPENING"));
//! let meeting = protocol.book_availability(&slot, request.clone()).expect("book");
//! assert_eq!(meeting.participant, "bob");
//! assert!(protocol.book_availability(&slot, request).unwrap_err().is_conflict());
//! ```
//!
//! Runtime usage with a SQLite store:
//! ```no_run
//! use slotbook::{
//!     config::{SchedulerConfig, StoreBackend},
//!     runtime::handle::open_scheduler,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut config = SchedulerConfig::for_stage("prod");
//! config.store = StoreBackend::Sqlite { path: "slotbook.db".into() };
//! let handle = open_scheduler(&config).await.expect("open");
//! handle.flush_stats().await.expect("flush");
//! let stats = handle.availability_stats().await.expect("stats");
//! println!("{} availabilities created", stats.created);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Construction-time configuration.
pub mod config;
/// In-memory store and document path helpers.
pub mod core;
/// Booking protocol and statistics engine.
pub mod engine;
/// Domain error taxonomy.
pub mod error;
/// Key-value store abstraction.
pub mod kv;
/// User, availability and meeting records.
pub mod model;
/// Write conditions and increment expressions.
pub mod op;
/// Durable store adapters.
pub mod persist;
/// Rating refresh job.
pub mod ratings;
/// Typed repository over the three tables.
pub mod repository;
/// Async runtime handle and events.
pub mod runtime;
/// Shared primitive types and vocabularies.
pub mod types;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::{
    config::{SchedulerConfig, Vocabulary},
    engine::{
        booking::BookingProtocol,
        stats::{AvailabilityStats, MeetingStats, StatsEvent, StatsRecorder, StatsSink},
    },
    error::{ErrorKind, SchedulerError, SchedulerResult},
    kv::KvStore,
    model::{Availability, Meeting, MeetingRequest, User, UserPatch},
    repository::Repository,
    types::{Cohort, MeetingId},
};

use super::events::SchedulerEvent;

/// Failures surfaced by [`SchedulerHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The operation itself failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The statistics worker is gone.
    #[error("scheduler runtime channel closed")]
    ChannelClosed,
    /// A blocking store task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl RuntimeError {
    /// Domain classification, when the failure came from an operation.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Scheduler(err) => Some(err.kind()),
            Self::ChannelClosed | Self::Join(_) => None,
        }
    }
}

/// Queue and channel sizes for the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Pending statistics events before new ones are dropped.
    pub stats_queue_bound: usize,
    /// Broadcast buffer for [`SchedulerEvent`]s.
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stats_queue_bound: 256,
            event_capacity: 1024,
        }
    }
}

enum StatsMsg {
    Event(StatsEvent),
    Flush { resp: oneshot::Sender<()> },
    Shutdown { resp: oneshot::Sender<()> },
}

/// Sink that hands events to the statistics worker without waiting.
struct QueuedStats {
    tx: mpsc::Sender<StatsMsg>,
    events_tx: broadcast::Sender<SchedulerEvent>,
}

impl StatsSink for QueuedStats {
    fn record(&self, event: StatsEvent) {
        let label = event.label();
        if let Err(err) = self.tx.try_send(StatsMsg::Event(event)) {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker stopped",
            };
            warn!(event = label, reason, "statistics event dropped");
            let _ = self.events_tx.send(SchedulerEvent::StatsDropped { event: label });
        }
    }
}

/// Cloneable async front end to the booking protocol.
pub struct SchedulerHandle {
    protocol: Arc<BookingProtocol>,
    recorder: StatsRecorder,
    stats_tx: mpsc::Sender<StatsMsg>,
    events_tx: broadcast::Sender<SchedulerEvent>,
}

impl Clone for SchedulerHandle {
    fn clone(&self) -> Self {
        Self {
            protocol: Arc::clone(&self.protocol),
            recorder: self.recorder.clone(),
            stats_tx: self.stats_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

/// Starts a scheduler over `store`. Must be called inside a tokio runtime.
///
/// When statistics seeding is enabled the worker seeds both aggregates
/// before applying any queued event.
pub fn spawn_scheduler(store: Arc<dyn KvStore>, config: &SchedulerConfig) -> SchedulerHandle {
    let (stats_tx, stats_rx) = mpsc::channel::<StatsMsg>(config.runtime.stats_queue_bound);
    let (events_tx, _) = broadcast::channel::<SchedulerEvent>(config.runtime.event_capacity);

    let repo = Repository::new(store, config.tables.clone());
    let recorder = StatsRecorder::new(&repo, config.stats.bucket_mode);
    let sink = QueuedStats {
        tx: stats_tx.clone(),
        events_tx: events_tx.clone(),
    };
    let protocol = BookingProtocol::new(repo, Arc::new(sink), config.booking_mode);

    let seed = config
        .stats
        .seed_on_start
        .then(|| config.stats.vocabulary.clone());
    spawn_stats_worker(recorder.clone(), stats_rx, events_tx.clone(), seed);

    SchedulerHandle {
        protocol: Arc::new(protocol),
        recorder,
        stats_tx,
        events_tx,
    }
}

/// Opens the configured store backend and starts a scheduler over it.
pub async fn open_scheduler(config: &SchedulerConfig) -> Result<SchedulerHandle, RuntimeError> {
    let backend = config.store.clone();
    let store = run_blocking(move || backend.open().map_err(SchedulerError::from)).await?;
    info!(tables = ?config.tables, "scheduler store opened");
    Ok(spawn_scheduler(store, config))
}

impl SchedulerHandle {
    /// Subscribes to lifecycle and statistics events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events_tx.subscribe()
    }

    /// Repository behind this handle, for synchronous callers.
    pub fn repository(&self) -> &Repository {
        self.protocol.repository()
    }

    /// Registers a user; the first registration of a username wins.
    pub async fn create_user(&self, user: User) -> Result<User, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        run_blocking(move || {
            protocol.repository().create_user(&user)?;
            Ok(user)
        })
        .await
    }

    /// Reads a user.
    pub async fn get_user(&self, username: impl Into<String>) -> Result<User, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        let username = username.into();
        run_blocking(move || protocol.repository().get_user(&username)).await
    }

    /// Applies a profile edit.
    pub async fn update_user(&self, username: impl Into<String>, patch: UserPatch) -> Result<User, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        let username = username.into();
        run_blocking(move || protocol.repository().update_user(&username, &patch)).await
    }

    /// Publishes an availability.
    pub async fn create_availability(&self, availability: Availability) -> Result<Availability, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        let created = run_blocking(move || protocol.create_availability(availability)).await?;
        let _ = self.events_tx.send(SchedulerEvent::AvailabilityCreated {
            owner: created.owner.clone(),
            id: created.id.clone(),
        });
        Ok(created)
    }

    /// Reads a live availability.
    pub async fn get_availability(
        &self,
        owner: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<Availability, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        let (owner, id) = (owner.into(), id.into());
        run_blocking(move || protocol.repository().get_availability(&owner, &id)).await
    }

    /// Converts `availability` into a meeting; see
    /// [`BookingProtocol::book_availability`].
    pub async fn book_availability(
        &self,
        availability: Availability,
        request: MeetingRequest,
    ) -> Result<Meeting, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        let meeting = run_blocking(move || protocol.book_availability(&availability, request)).await?;
        let _ = self.events_tx.send(SchedulerEvent::AvailabilityBooked {
            owner: meeting.owner.clone(),
            id: meeting.availability_id.clone(),
            meeting_id: meeting.id.clone(),
        });
        Ok(meeting)
    }

    /// Owner-initiated deletion of a live availability.
    pub async fn delete_availability(
        &self,
        owner: impl Into<String>,
        id: impl Into<String>,
        deleter_cohort: Cohort,
    ) -> Result<(), RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        let (owner, id) = (owner.into(), id.into());
        let (event_owner, event_id) = (owner.clone(), id.clone());
        run_blocking(move || protocol.delete_availability(&owner, &id, &deleter_cohort)).await?;
        let _ = self.events_tx.send(SchedulerEvent::AvailabilityDeleted {
            owner: event_owner,
            id: event_id,
        });
        Ok(())
    }

    /// Reads a meeting.
    pub async fn get_meeting(&self, meeting_id: MeetingId) -> Result<Meeting, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        run_blocking(move || protocol.repository().get_meeting(&meeting_id)).await
    }

    /// Cancels a scheduled meeting.
    pub async fn cancel_meeting(
        &self,
        meeting_id: MeetingId,
        canceler: impl Into<String>,
        canceler_cohort: Cohort,
    ) -> Result<Meeting, RuntimeError> {
        let protocol = Arc::clone(&self.protocol);
        let canceler = canceler.into();
        let meeting =
            run_blocking(move || protocol.cancel_meeting(&meeting_id, &canceler, &canceler_cohort)).await?;
        let _ = self.events_tx.send(SchedulerEvent::MeetingCanceled {
            meeting_id: meeting.id.clone(),
        });
        Ok(meeting)
    }

    /// Reads the availability aggregate.
    pub async fn availability_stats(&self) -> Result<AvailabilityStats, RuntimeError> {
        let recorder = self.recorder.clone();
        run_blocking(move || recorder.availability_stats()).await
    }

    /// Reads the meeting aggregate.
    pub async fn meeting_stats(&self) -> Result<MeetingStats, RuntimeError> {
        let recorder = self.recorder.clone();
        run_blocking(move || recorder.meeting_stats()).await
    }

    /// Waits until every statistics event queued before this call has been
    /// applied or has failed.
    pub async fn flush_stats(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.stats_tx
            .send(StatsMsg::Flush { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Drains queued statistics and stops the worker. Later statistics
    /// events are dropped; entity operations keep working.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.stats_tx
            .send(StatsMsg::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, RuntimeError>
where
    T: Send + 'static,
    F: FnOnce() -> SchedulerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RuntimeError::Join(e.to_string()))?
        .map_err(RuntimeError::from)
}

fn spawn_stats_worker(
    recorder: StatsRecorder,
    mut rx: mpsc::Receiver<StatsMsg>,
    events_tx: broadcast::Sender<SchedulerEvent>,
    seed: Option<Vocabulary>,
) {
    tokio::spawn(async move {
        if let Some(vocabulary) = seed {
            let seeder = recorder.clone();
            match tokio::task::spawn_blocking(move || seeder.seed(&vocabulary)).await {
                Ok(Ok(())) => info!("statistics aggregates seeded"),
                Ok(Err(err)) => warn!(error = %err, "statistics seeding failed"),
                Err(err) => warn!(error = %err, "statistics seeding task failed"),
            }
        }

        while let Some(msg) = rx.recv().await {
            match msg {
                StatsMsg::Event(event) => {
                    let label = event.label();
                    let worker = recorder.clone();
                    let outcome = match tokio::task::spawn_blocking(move || worker.apply(&event)).await {
                        Ok(Ok(())) => SchedulerEvent::StatsRecorded { event: label },
                        // Increment failures are logged by the recorder.
                        Ok(Err(_)) => SchedulerEvent::StatsFailed { event: label },
                        Err(err) => {
                            warn!(event = label, error = %err, "statistics task failed");
                            SchedulerEvent::StatsFailed { event: label }
                        }
                    };
                    let _ = events_tx.send(outcome);
                }
                StatsMsg::Flush { resp } => {
                    let _ = resp.send(());
                }
                StatsMsg::Shutdown { resp } => {
                    rx.close();
                    let mut pending = Vec::new();
                    while let Ok(msg) = rx.try_recv() {
                        match msg {
                            StatsMsg::Event(event) => pending.push(event),
                            StatsMsg::Flush { resp } | StatsMsg::Shutdown { resp } => {
                                let _ = resp.send(());
                            }
                        }
                    }
                    let drainer = recorder.clone();
                    let drained = pending.len();
                    let _ = tokio::task::spawn_blocking(move || {
                        for event in &pending {
                            let _ = drainer.apply(event);
                        }
                    })
                    .await;
                    info!(drained, "statistics worker stopped");
                    let _ = resp.send(());
                    break;
                }
            }
        }
    });
}

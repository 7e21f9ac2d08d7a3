//! Single-writer task that owns the [`JobRegistry`].
//!
//! Every mutation travels through a bounded command queue and is applied
//! in arrival order by one Tokio task. After each change the actor
//! publishes an immutable [`RegistrySnapshot`] on a watch channel, so
//! readers never touch the live table.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use trendscope_core::error::CoreError;
use trendscope_core::event::{EventSink, ProgressEvent};
use trendscope_core::job::JobRecord;
use trendscope_core::key::{CorrelationKey, Origin};
use trendscope_core::registry::{ApplyOutcome, JobRegistry, PlaceholderOutcome, RegistrySnapshot};
use trendscope_core::types::Sequence;

use crate::error::{TrackerError, TrackerResult};

/// Commands accepted by the registry task.
enum Command {
    Apply(Box<ProgressEvent>),
    Placeholder {
        key: CorrelationKey,
        origin: Origin,
        total: u32,
        sequence: Option<Sequence>,
        reply: oneshot::Sender<Result<PlaceholderOutcome, CoreError>>,
    },
    CancelRequested {
        key: CorrelationKey,
        reply: oneshot::Sender<bool>,
    },
    Dismiss {
        key: CorrelationKey,
        reply: oneshot::Sender<Result<JobRecord, CoreError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
    Shutdown,
}

/// Spawn the registry task with a command queue of `capacity`.
///
/// The task runs until [`RegistryHandle::shutdown`] is called or every
/// handle has been dropped.
pub fn spawn_registry(capacity: usize) -> (RegistryHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(RegistrySnapshot::default()));

    let task = tokio::spawn(run(JobRegistry::new(), command_rx, snapshot_tx));

    let handle = RegistryHandle {
        command_tx,
        snapshots: snapshot_rx,
    };
    (handle, task)
}

async fn run(
    mut registry: JobRegistry,
    mut command_rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<Arc<RegistrySnapshot>>,
) {
    tracing::info!("Job registry started");

    while let Some(command) = command_rx.recv().await {
        let before = registry.revision();

        // Publish before replying so a caller that awaited the reply
        // already sees the change through `latest()`.
        match command {
            Command::Apply(event) => {
                apply(&mut registry, &event);
                publish(&registry, &snapshot_tx, before);
            }
            Command::Placeholder {
                key,
                origin,
                total,
                sequence,
                reply,
            } => {
                let result = registry.insert_placeholder(key.clone(), origin, total, sequence);
                match &result {
                    Ok(outcome) => tracing::debug!(key = %key, ?outcome, "Placeholder registered"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Placeholder rejected"),
                }
                publish(&registry, &snapshot_tx, before);
                let _ = reply.send(result);
            }
            Command::CancelRequested { key, reply } => {
                let marked = registry.mark_cancel_requested(&key);
                publish(&registry, &snapshot_tx, before);
                let _ = reply.send(marked);
            }
            Command::Dismiss { key, reply } => {
                let result = registry.dismiss(&key);
                if result.is_ok() {
                    tracing::info!(key = %key, "Job dismissed");
                }
                publish(&registry, &snapshot_tx, before);
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(registry.snapshot());
            }
            Command::Shutdown => break,
        }
    }

    tracing::info!(jobs = registry.len(), "Job registry stopped");
}

fn publish(
    registry: &JobRegistry,
    snapshot_tx: &watch::Sender<Arc<RegistrySnapshot>>,
    before: u64,
) {
    if registry.revision() != before {
        snapshot_tx.send_replace(Arc::new(registry.snapshot()));
    }
}

fn apply(registry: &mut JobRegistry, event: &ProgressEvent) {
    match registry.apply(event) {
        Ok(outcome @ (ApplyOutcome::Created | ApplyOutcome::Confirmed | ApplyOutcome::Restarted)) => {
            tracing::info!(
                key = %event.key,
                phase = %event.phase,
                sequence = event.sequence,
                source = ?event.source,
                ?outcome,
                "Job tracked",
            );
        }
        Ok(ApplyOutcome::Updated { ignored_items }) => {
            tracing::debug!(
                key = %event.key,
                phase = %event.phase,
                sequence = event.sequence,
                source = ?event.source,
                ignored_items,
                "Job updated",
            );
        }
        Ok(ApplyOutcome::PhaseRegression) => {
            tracing::warn!(
                key = %event.key,
                phase = %event.phase,
                sequence = event.sequence,
                "Rejected event that would move the job phase backwards",
            );
        }
        Ok(outcome) => {
            tracing::debug!(
                key = %event.key,
                sequence = event.sequence,
                source = ?event.source,
                ?outcome,
                "Event ignored",
            );
        }
        Err(e) => {
            tracing::warn!(key = %event.key, sequence = event.sequence, error = %e, "Event rejected");
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to the registry task.
#[derive(Clone)]
pub struct RegistryHandle {
    command_tx: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
}

impl RegistryHandle {
    /// Queue an event for reconciliation.
    pub async fn apply(&self, event: ProgressEvent) -> TrackerResult<()> {
        self.command_tx
            .send(Command::Apply(Box::new(event)))
            .await
            .map_err(|_| TrackerError::RegistryClosed)
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.snapshots.clone()
    }

    /// Most recently published snapshot, without a round-trip.
    pub fn latest(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Snapshot taken after every command queued before this call.
    pub async fn snapshot(&self) -> TrackerResult<RegistrySnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn insert_placeholder(
        &self,
        key: CorrelationKey,
        origin: Origin,
        total: u32,
        sequence: Option<Sequence>,
    ) -> TrackerResult<PlaceholderOutcome> {
        let result = self
            .request(|reply| Command::Placeholder {
                key,
                origin,
                total,
                sequence,
                reply,
            })
            .await?;
        Ok(result?)
    }

    /// Record cancel intent. Returns `false` for unknown or finished jobs.
    pub async fn mark_cancel_requested(&self, key: &CorrelationKey) -> TrackerResult<bool> {
        let key = key.clone();
        self.request(|reply| Command::CancelRequested { key, reply })
            .await
    }

    /// Remove a terminal record.
    pub async fn dismiss(&self, key: &CorrelationKey) -> TrackerResult<JobRecord> {
        let key = key.clone();
        let result = self
            .request(|reply| Command::Dismiss { key, reply })
            .await?;
        Ok(result?)
    }

    /// Ask the task to stop after the commands already queued.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown).await;
    }

    // ---- private helpers ----

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> TrackerResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| TrackerError::RegistryClosed)?;
        reply_rx.await.map_err(|_| TrackerError::RegistryClosed)
    }
}

#[async_trait]
impl EventSink for RegistryHandle {
    async fn deliver(&self, event: ProgressEvent) {
        if self.apply(event).await.is_err() {
            tracing::debug!("Registry closed, dropping progress event");
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use trendscope_core::job::Provenance;
    use trendscope_core::phase::{JobKind, JobPhase};

    use super::*;

    fn key(id: i64) -> CorrelationKey {
        CorrelationKey::bulk(JobKind::BulkDownload, id)
    }

    // -- commands --

    #[tokio::test]
    async fn snapshot_reflects_queued_events() {
        let (registry, _task) = spawn_registry(8);
        registry
            .deliver(ProgressEvent::new(key(1), JobPhase::Downloading, 3))
            .await;

        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.get(&key(1)).unwrap().phase, JobPhase::Downloading);
    }

    #[tokio::test]
    async fn watchers_see_new_revisions() {
        let (registry, _task) = spawn_registry(8);
        let mut snapshots = registry.subscribe();
        assert_eq!(snapshots.borrow().revision, 0);

        registry
            .apply(ProgressEvent::new(key(1), JobPhase::Queued, 1))
            .await
            .unwrap();
        snapshots.changed().await.unwrap();

        let latest = snapshots.borrow_and_update().clone();
        assert!(latest.revision > 0);
        assert_eq!(latest.summary().queued, 1);
        assert_eq!(registry.latest().revision, latest.revision);
    }

    #[tokio::test]
    async fn ignored_events_publish_nothing() {
        let (registry, _task) = spawn_registry(8);
        registry
            .apply(ProgressEvent::new(key(1), JobPhase::Downloading, 5))
            .await
            .unwrap();
        let before = registry.snapshot().await.unwrap().revision;

        registry
            .apply(ProgressEvent::new(key(1), JobPhase::Downloading, 4))
            .await
            .unwrap();
        assert_eq!(registry.snapshot().await.unwrap().revision, before);
    }

    #[tokio::test]
    async fn placeholder_round_trip() {
        let (registry, _task) = spawn_registry(8);
        let outcome = registry
            .insert_placeholder(key(2), Origin::Manual, 4, None)
            .await
            .unwrap();
        assert_eq!(outcome, PlaceholderOutcome::Inserted);

        let second = registry
            .insert_placeholder(key(2), Origin::Manual, 4, None)
            .await;
        assert_matches!(second, Err(TrackerError::Core(CoreError::Integrity(_))));

        let snapshot = registry.snapshot().await.unwrap();
        let record = snapshot.get(&key(2)).unwrap();
        assert_eq!(record.provenance, Provenance::Optimistic);
        assert_eq!(record.counters.total, 4);
    }

    #[tokio::test]
    async fn fast_job_finishing_before_its_placeholder_is_not_left_queued() {
        let (registry, _task) = spawn_registry(8);
        registry
            .deliver(ProgressEvent::new(key(3), JobPhase::Completed, 2))
            .await;

        let outcome = registry
            .insert_placeholder(key(3), Origin::Manual, 1, None)
            .await
            .unwrap();

        assert_eq!(outcome, PlaceholderOutcome::AlreadyConfirmed);
        let latest = registry.latest();
        let record = latest.get(&key(3)).unwrap();
        assert_eq!(record.phase, JobPhase::Completed);
        assert_eq!(record.provenance, Provenance::Confirmed);
        assert_eq!(latest.summary().queued, 0);
    }

    #[tokio::test]
    async fn dismiss_errors_cross_the_queue() {
        let (registry, _task) = spawn_registry(8);
        assert_matches!(
            registry.dismiss(&key(9)).await,
            Err(TrackerError::Core(CoreError::NotFound { .. }))
        );

        registry
            .apply(ProgressEvent::new(key(9), JobPhase::Downloading, 1))
            .await
            .unwrap();
        assert_matches!(
            registry.dismiss(&key(9)).await,
            Err(TrackerError::Core(CoreError::Validation(_)))
        );
        assert!(registry.mark_cancel_requested(&key(9)).await.unwrap());
    }

    // -- lifecycle --

    #[tokio::test]
    async fn shutdown_closes_the_registry() {
        let (registry, task) = spawn_registry(8);
        registry.shutdown().await;
        task.await.unwrap();

        assert_matches!(registry.snapshot().await, Err(TrackerError::RegistryClosed));
        assert_matches!(
            registry
                .apply(ProgressEvent::new(key(1), JobPhase::Queued, 1))
                .await,
            Err(TrackerError::RegistryClosed)
        );
    }
}

//! Progress events and the sink seam every transport delivers into.
//!
//! A [`ProgressEvent`] is an immutable snapshot of one job at one
//! instant. Stream frames, poll snapshots and controller placeholders
//! all end up as the same type so the registry has a single input path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::key::{CorrelationKey, ItemKey, Origin};
use crate::phase::{ItemState, JobKind, JobPhase};
use crate::types::{Sequence, Timestamp};

// ---------------------------------------------------------------------------
// EventSource
// ---------------------------------------------------------------------------

/// The producer an event came through. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    Stream,
    Poll,
    Controller,
}

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// Per-item state carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub key: ItemKey,
    /// Human-readable identity, e.g. `tiktok @someone`.
    #[serde(default)]
    pub label: Option<String>,
    pub state: ItemState,
    #[serde(default)]
    pub error: Option<String>,
}

impl ItemUpdate {
    pub fn new(key: impl Into<String>, state: ItemState) -> Self {
        Self {
            key: ItemKey::new(key),
            label: None,
            state,
            error: None,
        }
    }

    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(key, ItemState::Error)
        }
    }
}

/// Snapshot of one job's aggregate state plus a delta or full set of
/// item states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub key: CorrelationKey,
    pub phase: JobPhase,
    /// Non-decreasing per job instance; used for staleness rejection.
    pub sequence: Sequence,
    /// Trigger of the job. Discovery keys carry their own origin, which
    /// takes precedence.
    #[serde(default)]
    pub origin: Origin,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
    /// Items are not required to be exhaustive.
    #[serde(default)]
    pub items: Vec<ItemUpdate>,
    #[serde(skip)]
    pub source: EventSource,
}

impl ProgressEvent {
    /// Create an event with zeroed counters and no items.
    pub fn new(key: CorrelationKey, phase: JobPhase, sequence: Sequence) -> Self {
        Self {
            key,
            phase,
            sequence,
            origin: Origin::Manual,
            started_at: None,
            total: 0,
            completed: 0,
            failed: 0,
            items: Vec::new(),
            source: EventSource::Stream,
        }
    }

    pub fn with_counters(mut self, total: u32, completed: u32, failed: u32) -> Self {
        self.total = total;
        self.completed = completed;
        self.failed = failed;
        self
    }

    pub fn with_items(mut self, items: Vec<ItemUpdate>) -> Self {
        self.items = items;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.key.kind()
    }

    /// The origin that applies to this job.
    pub fn effective_origin(&self) -> Origin {
        self.key
            .origin()
            .cloned()
            .unwrap_or_else(|| self.origin.clone())
    }
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Polled status: one event per currently-known job of a kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub jobs: Vec<ProgressEvent>,
}

impl StatusSnapshot {
    /// True when no job in the snapshot is still active.
    ///
    /// An empty snapshot counts as settled.
    pub fn all_terminal(&self) -> bool {
        self.jobs.iter().all(|job| job.phase.is_terminal())
    }

    /// Highest sequence in the snapshot, if any.
    pub fn max_sequence(&self) -> Option<Sequence> {
        self.jobs.iter().map(|job| job.sequence).max()
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Destination for parsed progress events.
///
/// Implemented by the registry handle; transports hold an
/// `Arc<dyn EventSink>` and never know what is behind it.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: ProgressEvent);
}

#[async_trait]
impl EventSink for mpsc::Sender<ProgressEvent> {
    async fn deliver(&self, event: ProgressEvent) {
        // A closed receiver means the consumer is shutting down.
        let _ = self.send(event).await;
    }
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<ProgressEvent> {
    async fn deliver(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_event() {
        let json = r#"{
            "key": {"type": "bulk", "kind": "bulk_analyze", "job_id": 9},
            "phase": "analyzing",
            "sequence": 4
        }"#;
        let event: ProgressEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), JobKind::BulkAnalyze);
        assert_eq!(event.phase, JobPhase::Analyzing);
        assert!(event.items.is_empty());
        assert_eq!(event.origin, Origin::Manual);
    }

    #[test]
    fn parse_event_with_items() {
        let json = r#"{
            "key": {"type": "discovery", "origin": {"type": "manual"}, "platform": "tiktok", "hashtag": "cats"},
            "phase": "fetching",
            "sequence": 11,
            "total": 2, "completed": 1, "failed": 1,
            "items": [
                {"key": "tiktok:@a", "state": "done"},
                {"key": "tiktok:@b", "state": "error", "error": "rate limited"}
            ]
        }"#;
        let event: ProgressEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.items.len(), 2);
        assert_eq!(event.items[1].error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn discovery_origin_wins_over_event_origin() {
        let key = CorrelationKey::discovery(Origin::scheduler("nightly"), "tiktok", "cats");
        let event = ProgressEvent::new(key, JobPhase::Queued, 1).with_origin(Origin::Manual);
        assert_eq!(event.effective_origin(), Origin::scheduler("nightly"));
    }

    #[test]
    fn empty_snapshot_is_settled() {
        let snapshot = StatusSnapshot::default();
        assert!(snapshot.all_terminal());
        assert_eq!(snapshot.max_sequence(), None);
    }

    #[tokio::test]
    async fn mpsc_sender_is_a_sink() {
        let (tx, mut rx) = mpsc::channel(4);
        let key = CorrelationKey::bulk(JobKind::BulkDownload, 1);
        tx.deliver(ProgressEvent::new(key, JobPhase::Queued, 1))
            .await;
        let received = rx.recv().await.expect("event should be delivered");
        assert_eq!(received.sequence, 1);
    }
}

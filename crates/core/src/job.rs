//! Registry records for jobs and their items.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::event::{EventSource, ItemUpdate, ProgressEvent};
use crate::key::{CorrelationKey, ItemKey, Origin};
use crate::phase::{ItemState, JobKind, JobPhase};
use crate::types::{Sequence, Timestamp};

/// Whether a record has been confirmed by the server yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Placeholder inserted by the controller right after a start call.
    Optimistic,
    /// At least one real progress event has been applied.
    Confirmed,
}

/// Aggregate item counters reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

impl Counters {
    /// Completion percentage (0-100), counting failed items as processed.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let processed = (self.completed + self.failed).min(self.total);
        ((processed as f64 / self.total as f64) * 100.0) as u8
    }
}

/// Client-side state of one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord {
    pub key: ItemKey,
    pub label: Option<String>,
    pub state: ItemState,
    pub error: Option<String>,
    /// Sequence of the event that last changed this item.
    pub sequence: Sequence,
}

impl ItemRecord {
    pub(crate) fn from_update(update: &ItemUpdate, sequence: Sequence) -> Self {
        Self {
            key: update.key.clone(),
            label: update.label.clone(),
            state: update.state,
            error: update.error.clone(),
            sequence,
        }
    }
}

/// What the client currently believes about one job instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub key: CorrelationKey,
    pub kind: JobKind,
    pub origin: Origin,
    pub phase: JobPhase,
    pub provenance: Provenance,
    /// Instance counter, bumped when a fresh run replaces a finished one.
    pub run: u32,
    /// Sequence of the last applied event. Placeholders may not have one.
    pub sequence: Option<Sequence>,
    pub started_at: Option<Timestamp>,
    pub counters: Counters,
    pub items: BTreeMap<ItemKey, ItemRecord>,
    /// Set by the controller after a successful cancel request.
    pub cancel_requested: bool,
    pub last_source: EventSource,
    /// Registry revision at which this record last changed.
    pub touched: u64,
    /// Local wall-clock time of the last change.
    pub updated_at: Timestamp,
}

impl JobRecord {
    /// Optimistic placeholder in `queued` phase.
    pub fn placeholder(
        key: CorrelationKey,
        origin: Origin,
        total: u32,
        sequence: Option<Sequence>,
    ) -> Self {
        Self {
            kind: key.kind(),
            key,
            origin,
            phase: JobPhase::Queued,
            provenance: Provenance::Optimistic,
            run: 0,
            sequence,
            started_at: None,
            counters: Counters {
                total,
                ..Counters::default()
            },
            items: BTreeMap::new(),
            cancel_requested: false,
            last_source: EventSource::Controller,
            touched: 0,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Confirmed record built entirely from one event.
    pub fn from_event(event: &ProgressEvent, run: u32) -> Self {
        let items = event
            .items
            .iter()
            .map(|update| {
                (
                    update.key.clone(),
                    ItemRecord::from_update(update, event.sequence),
                )
            })
            .collect();

        Self {
            key: event.key.clone(),
            kind: event.kind(),
            origin: event.effective_origin(),
            phase: event.phase,
            provenance: Provenance::Confirmed,
            run,
            sequence: Some(event.sequence),
            started_at: event.started_at,
            counters: Counters {
                total: event.total,
                completed: event.completed,
                failed: event.failed,
            },
            items,
            cancel_requested: false,
            last_source: event.source,
            touched: 0,
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Terminal records may be dismissed by the client.
    pub fn is_dismissible(&self) -> bool {
        self.is_terminal()
    }

    pub fn is_optimistic(&self) -> bool {
        self.provenance == Provenance::Optimistic
    }

    /// Items whose last reported state is `error`, with their reasons.
    pub fn failed_items(&self) -> impl Iterator<Item = &ItemRecord> {
        self.items
            .values()
            .filter(|item| item.state == ItemState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_counts_failed_as_processed() {
        let counters = Counters {
            total: 10,
            completed: 3,
            failed: 2,
        };
        assert_eq!(counters.percent(), 50);
    }

    #[test]
    fn percent_zero_total() {
        assert_eq!(Counters::default().percent(), 0);
    }

    #[test]
    fn percent_clamps_overreported_counts() {
        let counters = Counters {
            total: 4,
            completed: 5,
            failed: 1,
        };
        assert_eq!(counters.percent(), 100);
    }

    #[test]
    fn placeholder_is_queued_and_optimistic() {
        let key = CorrelationKey::bulk(JobKind::BulkAnalyze, 3);
        let record = JobRecord::placeholder(key, Origin::Manual, 12, None);
        assert_eq!(record.phase, JobPhase::Queued);
        assert!(record.is_optimistic());
        assert_eq!(record.counters.total, 12);
        assert!(!record.is_dismissible());
    }

    #[test]
    fn from_event_copies_items() {
        let key = CorrelationKey::bulk(JobKind::BulkDownload, 5);
        let event = ProgressEvent::new(key, JobPhase::Downloading, 8)
            .with_counters(2, 1, 1)
            .with_items(vec![
                ItemUpdate::new("v1", ItemState::Done),
                ItemUpdate::failed("v2", "404"),
            ]);
        let record = JobRecord::from_event(&event, 0);
        assert_eq!(record.items.len(), 2);
        assert_eq!(record.failed_items().count(), 1);
        assert_eq!(record.sequence, Some(8));
    }
}

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use trendscope_core::event::{ItemUpdate, ProgressEvent, StatusSnapshot};
use trendscope_core::key::CorrelationKey;
use trendscope_core::phase::{ItemState, JobKind, JobPhase};
use trendscope_core::request::{JobSpec, StartJobResponse};
use trendscope_transport::api::{JobApi, StatusFetcher};
use trendscope_transport::error::TransportError;

/// In-memory backend that accepts every start and cancel.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockApi {
    next_job_id: AtomicI64,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
    cancelled: Mutex<Vec<CorrelationKey>>,
    fail_next_start: Mutex<Option<TransportError>>,
    status_jobs: Mutex<Vec<ProgressEvent>>,
}

#[allow(dead_code)]
impl MockApi {
    pub fn new() -> Self {
        Self {
            next_job_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn fail_next_start(&self, error: TransportError) {
        *self.fail_next_start.lock().unwrap() = Some(error);
    }

    /// Jobs every later status poll reports, for all kinds.
    pub fn set_status(&self, jobs: Vec<ProgressEvent>) {
        *self.status_jobs.lock().unwrap() = jobs;
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<CorrelationKey> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobApi for MockApi {
    async fn start_job(&self, spec: &JobSpec) -> Result<StartJobResponse, TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_next_start.lock().unwrap().take() {
            return Err(error);
        }
        let key = match spec.kind {
            JobKind::DiscoveryScan => CorrelationKey::discovery(
                spec.origin.clone(),
                spec.platform.clone().unwrap_or_default(),
                spec.hashtag.clone().unwrap_or_default(),
            ),
            kind => CorrelationKey::bulk(kind, self.next_job_id.fetch_add(1, Ordering::SeqCst)),
        };
        Ok(StartJobResponse {
            key,
            phase: JobPhase::Queued,
            total: Some(spec.expected_total()),
            sequence: None,
        })
    }

    async fn cancel_job(&self, key: &CorrelationKey) -> Result<(), TransportError> {
        self.cancelled.lock().unwrap().push(key.clone());
        Ok(())
    }
}

#[async_trait]
impl StatusFetcher for MockApi {
    async fn fetch_status(&self, _kind: JobKind) -> Result<StatusSnapshot, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StatusSnapshot {
            jobs: self.status_jobs.lock().unwrap().clone(),
        })
    }
}

/// `done` finished items followed by `pending` waiting ones.
#[allow(dead_code)]
pub fn items(done: usize, pending: usize) -> Vec<ItemUpdate> {
    (0..done)
        .map(|i| ItemUpdate::new(format!("v{i}"), ItemState::Done))
        .chain((done..done + pending).map(|i| ItemUpdate::new(format!("v{i}"), ItemState::Pending)))
        .collect()
}

/// Event with counters derived from `items`.
#[allow(dead_code)]
pub fn event_with_items(
    key: &CorrelationKey,
    phase: JobPhase,
    sequence: u64,
    items: Vec<ItemUpdate>,
) -> ProgressEvent {
    let completed = items.iter().filter(|i| i.state == ItemState::Done).count() as u32;
    let failed = items.iter().filter(|i| i.state == ItemState::Error).count() as u32;
    let total = items.len() as u32;
    ProgressEvent::new(key.clone(), phase, sequence)
        .with_counters(total, completed, failed)
        .with_items(items)
}

//! Imperative start, cancel and dismiss on top of the registry.
//!
//! The controller never sets a job's phase itself. A successful start
//! registers an optimistic `queued` placeholder that the first real
//! event replaces; a cancel only records intent and waits for the
//! backend's own terminal event.

use std::sync::Arc;

use trendscope_core::error::CoreError;
use trendscope_core::job::JobRecord;
use trendscope_core::key::CorrelationKey;
use trendscope_core::phase::JobKind;
use trendscope_core::registry::PlaceholderOutcome;
use trendscope_core::request::JobSpec;
use trendscope_transport::api::JobApi;
use trendscope_transport::poll::PollGroup;

use crate::actor::RegistryHandle;
use crate::error::TrackerResult;

/// Reference to a job started (or observed) by this client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub key: CorrelationKey,
}

impl JobHandle {
    pub fn new(key: CorrelationKey) -> Self {
        Self { key }
    }

    pub fn kind(&self) -> JobKind {
        self.key.kind()
    }
}

impl From<CorrelationKey> for JobHandle {
    fn from(key: CorrelationKey) -> Self {
        Self::new(key)
    }
}

pub struct JobController {
    api: Arc<dyn JobApi>,
    registry: RegistryHandle,
    pollers: Option<Arc<PollGroup>>,
}

impl JobController {
    pub fn new(api: Arc<dyn JobApi>, registry: RegistryHandle) -> Self {
        Self {
            api,
            registry,
            pollers: None,
        }
    }

    /// Poll every started job until it finishes, restarting the channel
    /// for its kind when needed.
    pub fn with_pollers(mut self, pollers: Arc<PollGroup>) -> Self {
        self.pollers = Some(pollers);
        self
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Start a job.
    ///
    /// The request is validated before any network call. On success an
    /// optimistic placeholder is registered under the key the backend
    /// returned.
    pub async fn start(&self, spec: &JobSpec) -> TrackerResult<JobHandle> {
        spec.validate()?;

        let started = self.api.start_job(spec).await?;
        if started.key.kind() != spec.kind {
            return Err(CoreError::Integrity(format!(
                "Backend answered a {} start with key {}",
                spec.kind, started.key
            ))
            .into());
        }

        let total = started.total.unwrap_or_else(|| spec.expected_total());
        let outcome = self
            .registry
            .insert_placeholder(started.key.clone(), spec.origin.clone(), total, started.sequence)
            .await?;

        match outcome {
            PlaceholderOutcome::Inserted => tracing::info!(
                key = %started.key,
                total,
                "Job started, awaiting first progress event",
            ),
            PlaceholderOutcome::AlreadyConfirmed => tracing::debug!(
                key = %started.key,
                "Job confirmed before its placeholder was registered",
            ),
        }

        if let Some(pollers) = &self.pollers {
            if pollers.watch(started.key.clone()).await {
                tracing::debug!(key = %started.key, "Poll channel restarted for new job");
            }
        }

        Ok(JobHandle::new(started.key))
    }

    /// Request server-side cancellation.
    ///
    /// The phase is left alone; the backend's terminal event decides the
    /// outcome. Cancelling a job that already finished succeeds without
    /// effect.
    pub async fn cancel(&self, job: &JobHandle) -> TrackerResult<()> {
        self.api.cancel_job(&job.key).await?;
        let marked = self.registry.mark_cancel_requested(&job.key).await?;
        tracing::info!(key = %job.key, marked, "Cancel requested");
        Ok(())
    }

    /// Remove a finished job from the registry.
    pub async fn dismiss(&self, job: &JobHandle) -> TrackerResult<JobRecord> {
        self.registry.dismiss(&job.key).await
    }
}

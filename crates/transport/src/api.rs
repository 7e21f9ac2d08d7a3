//! REST client for the job backend.
//!
//! Wraps the start, cancel and status endpoints using [`reqwest`]. The
//! [`JobApi`] and [`StatusFetcher`] traits are the seams the controller
//! and the poll channel depend on, so both can run against stubs.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use trendscope_core::event::{EventSource, StatusSnapshot};
use trendscope_core::key::CorrelationKey;
use trendscope_core::phase::JobKind;
use trendscope_core::request::{JobSpec, StartJobResponse};

use crate::error::TransportError;

/// Default timeout for start and cancel requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Start and cancel operations.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Ask the backend to start a job. The response carries the
    /// correlation key under which progress will be reported.
    async fn start_job(&self, spec: &JobSpec) -> Result<StartJobResponse, TransportError>;

    /// Ask the backend to cancel a job. Cancelling a job that already
    /// finished is a successful no-op.
    async fn cancel_job(&self, key: &CorrelationKey) -> Result<(), TransportError>;
}

/// One status snapshot per call.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_status(&self, kind: JobKind) -> Result<StatusSnapshot, TransportError>;
}

/// HTTP client for the job backend.
pub struct HttpJobApi {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    key: &'a CorrelationKey,
}

impl HttpJobApi {
    /// Create a client for the backend at `api_url` (e.g.
    /// `https://host/`), authenticating with a bearer `token`.
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, api_url, token))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            token: token.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise map the
    /// status and body into a [`TransportError`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn start_job(&self, spec: &JobSpec) -> Result<StartJobResponse, TransportError> {
        let response = self
            .client
            .post(format!("{}/api/v1/jobs", self.api_url))
            .bearer_auth(&self.token)
            .json(spec)
            .send()
            .await?;

        let started: StartJobResponse = Self::parse_response(response).await?;
        tracing::info!(
            kind = %spec.kind,
            key = %started.key,
            "Job start accepted",
        );
        Ok(started)
    }

    async fn cancel_job(&self, key: &CorrelationKey) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/api/v1/jobs/cancel", self.api_url))
            .bearer_auth(&self.token)
            .json(&CancelRequest { key })
            .send()
            .await?;

        Self::ensure_success(response).await?;
        tracing::info!(key = %key, "Job cancel accepted");
        Ok(())
    }
}

#[async_trait]
impl StatusFetcher for HttpJobApi {
    async fn fetch_status(&self, kind: JobKind) -> Result<StatusSnapshot, TransportError> {
        let response = self
            .client
            .get(format!("{}/api/v1/jobs/status", self.api_url))
            .bearer_auth(&self.token)
            .query(&[("kind", kind.as_str())])
            .send()
            .await?;

        let mut snapshot: StatusSnapshot = Self::parse_response(response).await?;
        for job in &mut snapshot.jobs {
            job.source = EventSource::Poll;
        }
        Ok(snapshot)
    }
}

//! Start-job requests and their validation.
//!
//! Validation runs before any network call so that caller mistakes are
//! surfaced immediately as [`CoreError::Validation`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::key::{CorrelationKey, Origin};
use crate::phase::{JobKind, JobPhase};
use crate::types::Sequence;

/// Maximum number of items accepted in one bulk request.
pub const MAX_ITEMS_PER_JOB: usize = 500;

/// One selected unit of work (a video, an account, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTarget {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl JobTarget {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
        }
    }
}

/// What the caller wants started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub kind: JobKind,
    #[serde(default)]
    pub origin: Origin,
    /// Discovery scans only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Discovery scans only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtag: Option<String>,
    #[serde(default)]
    pub items: Vec<JobTarget>,
    /// Opaque, kind-specific options forwarded to the backend.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl JobSpec {
    /// A discovery scan of one hashtag on one platform.
    pub fn discovery(
        origin: Origin,
        platform: impl Into<String>,
        hashtag: impl Into<String>,
    ) -> Self {
        Self {
            kind: JobKind::DiscoveryScan,
            origin,
            platform: Some(platform.into()),
            hashtag: Some(hashtag.into()),
            items: Vec::new(),
            parameters: serde_json::Value::Null,
        }
    }

    /// A bulk analyze/download over the given targets.
    pub fn bulk(kind: JobKind, items: Vec<JobTarget>) -> Self {
        Self {
            kind,
            origin: Origin::Manual,
            platform: None,
            hashtag: None,
            items,
            parameters: serde_json::Value::Null,
        }
    }

    /// Number of items the job is expected to process.
    pub fn expected_total(&self) -> u32 {
        match self.kind {
            JobKind::DiscoveryScan if self.items.is_empty() => 1,
            _ => self.items.len() as u32,
        }
    }

    /// Reject empty or malformed requests.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.kind {
            JobKind::DiscoveryScan => {
                validate_non_blank("platform", self.platform.as_deref())?;
                validate_non_blank("hashtag", self.hashtag.as_deref())?;
            }
            JobKind::BulkAnalyze | JobKind::BulkDownload => {
                if self.items.is_empty() {
                    return Err(CoreError::Validation(format!(
                        "{} requires at least one selected item",
                        self.kind
                    )));
                }
            }
        }

        if self.items.len() > MAX_ITEMS_PER_JOB {
            return Err(CoreError::Validation(format!(
                "At most {MAX_ITEMS_PER_JOB} items may be selected, got {}",
                self.items.len()
            )));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for target in &self.items {
            if target.key.trim().is_empty() {
                return Err(CoreError::Validation(
                    "Item key must not be empty".to_string(),
                ));
            }
            if !seen.insert(target.key.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Item '{}' selected more than once",
                    target.key
                )));
            }
        }

        if let Origin::Scheduler { id } = &self.origin {
            validate_non_blank("scheduler id", Some(id))?;
        }

        Ok(())
    }
}

fn validate_non_blank(field: &str, value: Option<&str>) -> Result<(), CoreError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(CoreError::Validation(format!("{field} must not be empty"))),
    }
}

/// Backend reply to a successful start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub key: CorrelationKey,
    #[serde(default = "default_phase")]
    pub phase: JobPhase,
    #[serde(default)]
    pub total: Option<u32>,
    /// Sequence of the queued state, when the backend reports one.
    #[serde(default)]
    pub sequence: Option<Sequence>,
}

fn default_phase() -> JobPhase {
    JobPhase::Queued
}

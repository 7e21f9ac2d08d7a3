//! Correlation keys: how an inbound event finds its job and items.
//!
//! Discovery scans are keyed by `(origin, platform, hashtag)` so that a
//! manual run and a scheduler run of the same hashtag stay separate.
//! Bulk operations are keyed by the backend job id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::phase::JobKind;
use crate::types::JobId;

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// What triggered a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Origin {
    /// Started by a user from the dashboard.
    #[default]
    Manual,
    /// Started by a named recurring scheduler.
    Scheduler { id: String },
}

impl Origin {
    pub fn scheduler(id: impl Into<String>) -> Self {
        Origin::Scheduler { id: id.into() }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Manual => f.write_str("manual"),
            Origin::Scheduler { id } => write!(f, "scheduler:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// CorrelationKey
// ---------------------------------------------------------------------------

/// Identifies one job across both transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrelationKey {
    Discovery {
        origin: Origin,
        platform: String,
        hashtag: String,
    },
    Bulk {
        kind: JobKind,
        job_id: JobId,
    },
}

impl CorrelationKey {
    pub fn discovery(
        origin: Origin,
        platform: impl Into<String>,
        hashtag: impl Into<String>,
    ) -> Self {
        CorrelationKey::Discovery {
            origin,
            platform: platform.into(),
            hashtag: hashtag.into(),
        }
    }

    pub fn bulk(kind: JobKind, job_id: JobId) -> Self {
        CorrelationKey::Bulk { kind, job_id }
    }

    /// The job kind implied by the key.
    pub fn kind(&self) -> JobKind {
        match self {
            CorrelationKey::Discovery { .. } => JobKind::DiscoveryScan,
            CorrelationKey::Bulk { kind, .. } => *kind,
        }
    }

    /// Origin embedded in the key, if the key carries one.
    pub fn origin(&self) -> Option<&Origin> {
        match self {
            CorrelationKey::Discovery { origin, .. } => Some(origin),
            CorrelationKey::Bulk { .. } => None,
        }
    }

    /// The entity this job is displayed against.
    ///
    /// Two discovery runs of the same hashtag from different origins
    /// share a display entity even though their keys differ.
    pub fn display_entity(&self) -> DisplayEntity {
        match self {
            CorrelationKey::Discovery {
                platform, hashtag, ..
            } => DisplayEntity::Hashtag {
                platform: platform.clone(),
                hashtag: hashtag.clone(),
            },
            CorrelationKey::Bulk { kind, job_id } => DisplayEntity::Job {
                kind: *kind,
                job_id: *job_id,
            },
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Discovery {
                origin,
                platform,
                hashtag,
            } => write!(f, "discovery/{origin}/{platform}/#{hashtag}"),
            CorrelationKey::Bulk { kind, job_id } => write!(f, "{kind}/{job_id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemKey / DisplayEntity
// ---------------------------------------------------------------------------

/// Identifies an item inside its job (e.g. `tiktok:@user` or a video id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(pub String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        ItemKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(value: &str) -> Self {
        ItemKey(value.to_string())
    }
}

/// What a job is rendered against in the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DisplayEntity {
    Hashtag { platform: String, hashtag: String },
    Job { kind: JobKind, job_id: JobId },
}

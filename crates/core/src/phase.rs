//! Job kinds, job phases, and item states.
//!
//! Phases follow a fixed rank order (`queued < fetching < analyzing <
//! downloading < completed`). Forward jumps are allowed, backward moves
//! are not; `error` and `cancelled` are reachable from any active phase.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// The category of background work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Hashtag discovery scan.
    DiscoveryScan,
    /// Bulk AI content analysis.
    BulkAnalyze,
    /// Bulk media download.
    BulkDownload,
}

impl JobKind {
    /// Every kind, in a stable order.
    pub const ALL: [JobKind; 3] = [
        JobKind::DiscoveryScan,
        JobKind::BulkAnalyze,
        JobKind::BulkDownload,
    ];

    /// Wire representation, also used as the `kind` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::DiscoveryScan => "discovery_scan",
            JobKind::BulkAnalyze => "bulk_analyze",
            JobKind::BulkDownload => "bulk_download",
        }
    }

    /// Parse the wire representation. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "discovery_scan" => Some(JobKind::DiscoveryScan),
            "bulk_analyze" => Some(JobKind::BulkAnalyze),
            "bulk_download" => Some(JobKind::BulkDownload),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobPhase
// ---------------------------------------------------------------------------

/// Coarse lifecycle stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Fetching,
    Analyzing,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl JobPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Fetching => "fetching",
            JobPhase::Analyzing => "analyzing",
            JobPhase::Downloading => "downloading",
            JobPhase::Completed => "completed",
            JobPhase::Error => "error",
            JobPhase::Cancelled => "cancelled",
        }
    }

    /// `completed`, `error` and `cancelled` end a job instance.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Error | JobPhase::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Position in the forward progression. `error` and `cancelled`
    /// share the terminal rank with `completed`.
    fn rank(self) -> u8 {
        match self {
            JobPhase::Queued => 0,
            JobPhase::Fetching => 1,
            JobPhase::Analyzing => 2,
            JobPhase::Downloading => 3,
            JobPhase::Completed | JobPhase::Error | JobPhase::Cancelled => 4,
        }
    }

    /// Whether a job currently in `self` may move to `next` within the
    /// same instance.
    ///
    /// Staying in the same phase is always allowed (progress updates).
    /// Terminal phases allow no further transition.
    pub fn can_advance_to(self, next: JobPhase) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ItemState
// ---------------------------------------------------------------------------

/// State of a single unit of work inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Active,
    Done,
    Error,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Done | ItemState::Error)
    }
}

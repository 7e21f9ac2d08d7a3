//! In-memory job table and the merge algorithm.
//!
//! [`JobRegistry`] is plain data with `&mut self` mutators; it performs
//! no locking and no I/O. Serialisation of writers is the caller's job
//! (see the tracker's registry actor).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::CoreError;
use crate::event::ProgressEvent;
use crate::job::{JobRecord, Provenance};
use crate::key::{CorrelationKey, DisplayEntity, Origin};
use crate::phase::{JobKind, JobPhase};
use crate::reconcile::{self, Decision};
use crate::types::Sequence;

/// How many untracked terminal events are kept for late placeholders.
const RECENT_TERMINAL_CAPACITY: usize = 64;

/// How long an untracked terminal event can still settle a placeholder.
const RECENT_TERMINAL_TTL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of applying one progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new record was created for a previously unknown key.
    Created,
    /// The event was merged into the existing instance.
    Updated {
        /// Item updates dropped because they would regress a terminal item.
        ignored_items: usize,
    },
    /// An optimistic placeholder was replaced by the confirmed record.
    Confirmed,
    /// A finished instance was replaced by a fresh run.
    Restarted,
    /// Not newer than the stored sequence; nothing changed.
    Stale,
    /// The record is terminal and frozen; nothing changed.
    Frozen,
    /// The event would move the phase backwards; nothing changed.
    PhaseRegression,
    /// Terminal event for an unknown key; not recorded.
    Untracked,
}

impl ApplyOutcome {
    /// Whether the registry state changed.
    pub fn changed(self) -> bool {
        matches!(
            self,
            ApplyOutcome::Created
                | ApplyOutcome::Updated { .. }
                | ApplyOutcome::Confirmed
                | ApplyOutcome::Restarted
        )
    }
}

/// Result of registering an optimistic placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderOutcome {
    Inserted,
    /// A real event for the same job arrived before the placeholder.
    ///
    /// If that event was terminal the finished record is stored instead
    /// of a `queued` placeholder.
    AlreadyConfirmed,
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Counts per presentation grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Immutable copy of the whole registry at one revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub revision: u64,
    /// Sorted by correlation key.
    pub jobs: Vec<JobRecord>,
}

impl RegistrySnapshot {
    pub fn get(&self, key: &CorrelationKey) -> Option<&JobRecord> {
        self.jobs
            .binary_search_by(|job| job.key.cmp(key))
            .ok()
            .map(|idx| &self.jobs[idx])
    }

    pub fn summary(&self) -> JobSummary {
        summarize(self.jobs.iter())
    }

    /// Same tie-break as [`JobRegistry::display_view`].
    pub fn display_view(&self) -> Vec<&JobRecord> {
        display_winners(self.jobs.iter())
    }
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// Table of known jobs keyed by correlation key.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<CorrelationKey, JobRecord>,
    revision: u64,
    /// Terminal events that arrived for keys with no record yet.
    recent_terminal: VecDeque<RecentTerminal>,
    /// Keys removed by `dismiss`, with the sequence they were removed at.
    dismissed: VecDeque<(CorrelationKey, Option<Sequence>)>,
}

#[derive(Debug)]
struct RecentTerminal {
    event: ProgressEvent,
    seen_at: Instant,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter bumped on every state change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Apply one progress event.
    ///
    /// Returns [`CoreError::Integrity`] if the event lists the same item
    /// twice; such an event is rejected as a whole.
    pub fn apply(&mut self, event: &ProgressEvent) -> Result<ApplyOutcome, CoreError> {
        reconcile::check_unique_items(event)?;

        let Some(record) = self.jobs.get(&event.key) else {
            if event.phase.is_terminal() {
                self.remember_untracked(event);
                return Ok(ApplyOutcome::Untracked);
            }
            let record = JobRecord::from_event(event, 0);
            self.store(record);
            return Ok(ApplyOutcome::Created);
        };

        let outcome = match reconcile::decide(record, event) {
            Decision::Stale => ApplyOutcome::Stale,
            Decision::Frozen => ApplyOutcome::Frozen,
            Decision::PhaseRegression => ApplyOutcome::PhaseRegression,
            Decision::Confirm => {
                let mut confirmed = JobRecord::from_event(event, record.run);
                confirmed.cancel_requested = record.cancel_requested && event.phase.is_active();
                self.store(confirmed);
                ApplyOutcome::Confirmed
            }
            Decision::Restart => {
                let fresh = JobRecord::from_event(event, record.run + 1);
                self.store(fresh);
                ApplyOutcome::Restarted
            }
            Decision::Merge => {
                let ignored_items = self.merge(event);
                ApplyOutcome::Updated { ignored_items }
            }
        };

        Ok(outcome)
    }

    /// Register an optimistic `queued` placeholder after a successful
    /// start call.
    ///
    /// A finished record under the same key is superseded. An active,
    /// confirmed record is either the same job confirmed early (its
    /// sequence is at least `sequence`, or no sequence is known) or a
    /// key collision, which is reported as [`CoreError::Integrity`].
    ///
    /// A job can also finish before its start reply is processed. If a
    /// terminal event for `key` was turned away as untracked within the
    /// last minute, that event becomes the record and no placeholder is
    /// stored.
    pub fn insert_placeholder(
        &mut self,
        key: CorrelationKey,
        origin: Origin,
        total: u32,
        sequence: Option<Sequence>,
    ) -> Result<PlaceholderOutcome, CoreError> {
        let run = match self.jobs.get(&key) {
            None => {
                if let Some(event) = self.take_recent_terminal(&key, sequence) {
                    let mut record = JobRecord::from_event(&event, 0);
                    record.origin = origin;
                    self.store(record);
                    return Ok(PlaceholderOutcome::AlreadyConfirmed);
                }
                0
            }
            Some(existing) if existing.is_terminal() => existing.run + 1,
            Some(existing) if existing.provenance == Provenance::Optimistic => {
                return Err(CoreError::Integrity(format!(
                    "Job {key} already has a pending start"
                )));
            }
            Some(existing) => match (sequence, existing.sequence) {
                (Some(started), Some(current)) if current < started => {
                    return Err(CoreError::Integrity(format!(
                        "Job {key} is already running (sequence {current}) and cannot be started again"
                    )));
                }
                _ => return Ok(PlaceholderOutcome::AlreadyConfirmed),
            },
        };

        let mut placeholder = JobRecord::placeholder(key, origin, total, sequence);
        placeholder.run = run;
        self.store(placeholder);
        Ok(PlaceholderOutcome::Inserted)
    }

    /// Record the user's cancel intent. Returns `false` if the job is
    /// unknown or already terminal.
    pub fn mark_cancel_requested(&mut self, key: &CorrelationKey) -> bool {
        let revision = self.revision + 1;
        match self.jobs.get_mut(key) {
            Some(record) if record.phase.is_active() && !record.cancel_requested => {
                record.cancel_requested = true;
                record.touched = revision;
                record.updated_at = chrono::Utc::now();
                self.revision = revision;
                true
            }
            _ => false,
        }
    }

    /// Remove a terminal record.
    pub fn dismiss(&mut self, key: &CorrelationKey) -> Result<JobRecord, CoreError> {
        let record = self.jobs.get(key).ok_or_else(|| CoreError::NotFound {
            entity: "job",
            key: key.to_string(),
        })?;

        if !record.is_dismissible() {
            return Err(CoreError::Validation(format!(
                "Job {key} is still {} and cannot be dismissed",
                record.phase
            )));
        }

        self.dismissed.push_back((key.clone(), record.sequence));
        if self.dismissed.len() > RECENT_TERMINAL_CAPACITY {
            self.dismissed.pop_front();
        }
        self.recent_terminal.retain(|recent| recent.event.key != *key);

        self.revision += 1;
        self.jobs.remove(key).ok_or_else(|| {
            CoreError::Internal(format!("Job {key} vanished during dismiss"))
        })
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<&JobRecord> {
        self.jobs.get(key)
    }

    /// All records, sorted by key.
    pub fn jobs(&self) -> Vec<&JobRecord> {
        let mut jobs: Vec<&JobRecord> = self.jobs.values().collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        jobs
    }

    pub fn jobs_of_kind(&self, kind: JobKind) -> Vec<&JobRecord> {
        self.jobs()
            .into_iter()
            .filter(|job| job.kind == kind)
            .collect()
    }

    /// Whether any record of `kind` is still active.
    pub fn has_active(&self, kind: JobKind) -> bool {
        self.jobs
            .values()
            .any(|job| job.kind == kind && job.phase.is_active())
    }

    /// One record per display entity: the most recently updated wins.
    ///
    /// Every record is still tracked independently; this only decides
    /// what is shown when two jobs target the same entity.
    pub fn display_view(&self) -> Vec<&JobRecord> {
        display_winners(self.jobs.values())
    }

    pub fn summary(&self) -> JobSummary {
        summarize(self.jobs.values())
    }

    /// Cloned copy of every record.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            revision: self.revision,
            jobs: self.jobs().into_iter().cloned().collect(),
        }
    }

    // ---- private helpers ----

    fn store(&mut self, mut record: JobRecord) {
        self.revision += 1;
        record.touched = self.revision;
        record.updated_at = chrono::Utc::now();
        self.jobs.insert(record.key.clone(), record);
    }

    fn remember_untracked(&mut self, event: &ProgressEvent) {
        // Poll echoes of a dismissed job must not resurrect it.
        let dismissed_echo = self.dismissed.iter().any(|(key, sequence)| {
            *key == event.key && sequence.is_some_and(|s| event.sequence <= s)
        });
        if dismissed_echo {
            return;
        }

        if let Some(pos) = self
            .recent_terminal
            .iter()
            .position(|recent| recent.event.key == event.key)
        {
            if self.recent_terminal[pos].event.sequence >= event.sequence {
                return;
            }
            self.recent_terminal.remove(pos);
        }

        self.recent_terminal.push_back(RecentTerminal {
            event: event.clone(),
            seen_at: Instant::now(),
        });
        if self.recent_terminal.len() > RECENT_TERMINAL_CAPACITY {
            self.recent_terminal.pop_front();
        }
    }

    fn take_recent_terminal(
        &mut self,
        key: &CorrelationKey,
        started: Option<Sequence>,
    ) -> Option<ProgressEvent> {
        self.recent_terminal
            .retain(|recent| recent.seen_at.elapsed() <= RECENT_TERMINAL_TTL);
        let pos = self.recent_terminal.iter().position(|recent| {
            recent.event.key == *key && started.map_or(true, |s| recent.event.sequence >= s)
        })?;
        self.recent_terminal.remove(pos).map(|recent| recent.event)
    }

    fn merge(&mut self, event: &ProgressEvent) -> usize {
        self.revision += 1;
        let revision = self.revision;
        let Some(record) = self.jobs.get_mut(&event.key) else {
            return 0;
        };

        let ignored = reconcile::merge_items(&mut record.items, &event.items, event.sequence);
        if ignored > 0 {
            tracing::debug!(
                key = %event.key,
                sequence = event.sequence,
                ignored,
                "Ignored item updates that would regress terminal items",
            );
        }

        record.phase = event.phase;
        record.sequence = Some(event.sequence);
        record.started_at = event.started_at.or(record.started_at);
        record.counters.total = event.total;
        record.counters.completed = event.completed;
        record.counters.failed = event.failed;
        record.last_source = event.source;
        if event.phase.is_terminal() {
            record.cancel_requested = false;
        }
        record.touched = revision;
        record.updated_at = chrono::Utc::now();
        ignored
    }
}

fn display_winners<'a>(jobs: impl Iterator<Item = &'a JobRecord>) -> Vec<&'a JobRecord> {
    let mut winners: BTreeMap<DisplayEntity, &JobRecord> = BTreeMap::new();
    for job in jobs {
        let entity = job.key.display_entity();
        match winners.get(&entity) {
            Some(current) if current.touched >= job.touched => {}
            _ => {
                winners.insert(entity, job);
            }
        }
    }
    winners.into_values().collect()
}

fn summarize<'a>(jobs: impl Iterator<Item = &'a JobRecord>) -> JobSummary {
    let mut summary = JobSummary::default();
    for job in jobs {
        match job.phase {
            JobPhase::Queued => summary.queued += 1,
            JobPhase::Fetching | JobPhase::Analyzing | JobPhase::Downloading => {
                summary.active += 1
            }
            JobPhase::Completed => summary.completed += 1,
            JobPhase::Error => summary.failed += 1,
            JobPhase::Cancelled => summary.cancelled += 1,
        }
    }
    summary
}

//! Merge rules deciding whether an inbound event supersedes the stored
//! record.
//!
//! Everything here is pure: the registry asks [`decide`] what to do and
//! then performs the mutation itself.

use std::collections::{BTreeMap, HashSet};

use crate::error::CoreError;
use crate::event::{ItemUpdate, ProgressEvent};
use crate::job::{ItemRecord, JobRecord, Provenance};
use crate::key::ItemKey;
use crate::phase::JobPhase;
use crate::types::Sequence;

/// What to do with an event for a job that already has a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Merge the event into the current instance.
    Merge,
    /// Replace an optimistic placeholder with the confirmed record.
    Confirm,
    /// Discard the finished instance and start a fresh run.
    Restart,
    /// Sequence is not newer than the stored one.
    Stale,
    /// The record is terminal; counters are frozen.
    Frozen,
    /// The event would move the phase backwards.
    PhaseRegression,
}

/// Decide how `event` relates to the stored `record`.
pub fn decide(record: &JobRecord, event: &ProgressEvent) -> Decision {
    if record.provenance == Provenance::Optimistic {
        // A placeholder without a sequence yields to any real event.
        return match record.sequence {
            Some(seq) if event.sequence <= seq => Decision::Stale,
            _ => Decision::Confirm,
        };
    }

    if !is_newer(event.sequence, record.sequence) {
        return Decision::Stale;
    }

    if record.phase.is_terminal() {
        return if event.phase == JobPhase::Queued {
            Decision::Restart
        } else {
            Decision::Frozen
        };
    }

    if !record.phase.can_advance_to(event.phase) {
        return Decision::PhaseRegression;
    }

    Decision::Merge
}

/// Strictly-newer check; a missing stored sequence accepts anything.
pub fn is_newer(incoming: Sequence, stored: Option<Sequence>) -> bool {
    match stored {
        Some(stored) => incoming > stored,
        None => true,
    }
}

/// Reject events that name the same item twice.
pub fn check_unique_items(event: &ProgressEvent) -> Result<(), CoreError> {
    let mut seen: HashSet<&ItemKey> = HashSet::with_capacity(event.items.len());
    for item in &event.items {
        if !seen.insert(&item.key) {
            return Err(CoreError::Integrity(format!(
                "Item '{}' appears more than once in event for {} (sequence {})",
                item.key, event.key, event.sequence
            )));
        }
    }
    Ok(())
}

/// Merge item updates into `items`, never regressing a terminal item.
///
/// Items absent from `updates` are left untouched. Returns the number of
/// updates ignored because they would have regressed a terminal item.
pub fn merge_items(
    items: &mut BTreeMap<ItemKey, ItemRecord>,
    updates: &[ItemUpdate],
    sequence: Sequence,
) -> usize {
    let mut ignored = 0;
    for update in updates {
        match items.get_mut(&update.key) {
            Some(existing) if existing.state.is_terminal() && !update.state.is_terminal() => {
                ignored += 1;
            }
            Some(existing) => {
                existing.state = update.state;
                existing.error = update.error.clone();
                if update.label.is_some() {
                    existing.label = update.label.clone();
                }
                existing.sequence = sequence;
            }
            None => {
                items.insert(
                    update.key.clone(),
                    ItemRecord::from_update(update, sequence),
                );
            }
        }
    }
    ignored
}

//! Domain types and the reconciliation engine for job-progress tracking.
//!
//! - [`event::ProgressEvent`]: immutable snapshot of one job at one instant.
//! - [`key::CorrelationKey`]: matches events to jobs across transports.
//! - [`registry::JobRegistry`]: the job table and its merge algorithm.
//! - [`reconcile`]: pure staleness, phase and item merge rules.
//! - [`event::EventSink`]: the seam every transport delivers into.

pub mod error;
pub mod event;
pub mod job;
pub mod key;
pub mod phase;
pub mod reconcile;
pub mod registry;
pub mod request;
pub mod types;

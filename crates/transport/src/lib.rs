//! Transports that feed progress events into the registry.
//!
//! Provides the push-based event stream (WebSocket with reconnection),
//! the pull-based status poller, and the REST client used for job
//! start, cancel and status snapshots.

pub mod api;
pub mod client;
pub mod error;
pub mod frames;
pub mod poll;
pub mod reconnect;
pub mod stream;

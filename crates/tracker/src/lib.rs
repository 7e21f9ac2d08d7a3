//! Job-progress tracker: the registry actor, the job controller, and
//! the configuration shared by the `trendscope-tracker` binary.

pub mod actor;
pub mod config;
pub mod controller;
pub mod error;

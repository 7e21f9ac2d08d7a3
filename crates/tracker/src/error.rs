use trendscope_core::error::CoreError;
use trendscope_transport::error::TransportError;

/// Errors returned by the tracker's public operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A domain-level error from `trendscope_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A backend call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The registry actor has shut down.
    #[error("Job registry is not running")]
    RegistryClosed,
}

/// Convenience alias for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

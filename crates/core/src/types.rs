/// Server-assigned ordering value carried by every progress event.
///
/// Either a per-job counter or epoch milliseconds; the registry only
/// relies on it being non-decreasing for a single job instance.
pub type Sequence = u64;

/// Numeric job id assigned by the backend for bulk operations.
pub type JobId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

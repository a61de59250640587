//! Shared constants for job records and queue execution.

use chrono::{DateTime, Utc};

/// File extension used by the filesystem gateway for on-disk record files.
pub const RECORD_FILE_EXT: &str = "job";

/// Default ceiling on a single job's execution time (2 hours).
///
/// After this much wall-clock time the executor abandons the invocation
/// and the job record is left in `Running`; the next process restart's
/// orphan scan reconciles it to `Failed`.
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 2 * 3600;

/// Sentinel `end_time` carried by records that have not reached a
/// terminal state.
///
/// The value is 9999-12-31T23:59:59Z, far enough in the future that any
/// real completion time sorts before it.
///
/// # Examples
///
/// ```
/// use mljobs::constants::end_time_sentinel;
///
/// let sentinel = end_time_sentinel();
/// assert!(sentinel > chrono::Utc::now());
/// ```
pub fn end_time_sentinel() -> DateTime<Utc> {
    // 253402300799 == 9999-12-31T23:59:59Z. The fallback is unreachable
    // for an in-range literal but keeps this constructor panic-free.
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

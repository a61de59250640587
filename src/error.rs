//! Error types for job lifecycle operations.
//!
//! [`JobError`] is the crate-wide error enum. Lookup misses are not
//! errors -- `fetch` and `check_status` report absence through their
//! return types -- so `NotFound` only appears when a *mutating* operation
//! targets a record that does not exist. Work-function failures are both
//! recorded durably (as an exception on the job record) and re-signalled
//! to the caller; they are never swallowed.

use thiserror::Error;

use crate::types::{Backend, JobStatus};

/// Failure captured from a work function or a result-session scope.
///
/// The lifecycle controller models work outcomes internally as
/// `Result<Vec<u8>, WorkFailure>`; only at the crate boundary is the
/// failure re-signalled as [`JobError::WorkFailure`]. The `kind` tag is
/// what gets persisted as the exception record's kind, so callers that
/// care about categorization should construct failures with a stable tag.
///
/// # Examples
///
/// ```
/// use mljobs::WorkFailure;
///
/// let failure = WorkFailure::new("ValueError", "series contains NaN");
/// assert_eq!(failure.to_string(), "ValueError: series contains NaN");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct WorkFailure {
    /// Categorical tag, e.g. the error type's name.
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl WorkFailure {
    /// Creates a failure with an explicit kind tag.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates a failure from any error, using the error type's short
    /// name as the kind tag.
    ///
    /// # Examples
    ///
    /// ```
    /// use mljobs::WorkFailure;
    ///
    /// let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing input");
    /// let failure = WorkFailure::from_error(&io);
    /// assert_eq!(failure.kind, "Error");
    /// assert!(failure.message.contains("missing input"));
    /// ```
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let kind = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error");
        Self::new(kind, err.to_string())
    }
}

/// Errors that can occur during job lifecycle operations.
///
/// Variants carry the identity of the record involved so callers and log
/// output can pinpoint the offending job without extra lookups.
#[derive(Debug, Error)]
pub enum JobError {
    /// A mutating operation targeted a record that does not exist.
    ///
    /// Status queries never produce this; absence there is reported as
    /// [`JobStatus::Unknown`] or `None`.
    #[error("no job record for {name}/{key} ({backend})")]
    NotFound {
        /// Model name of the missing record.
        name: String,
        /// Lookup key of the missing record.
        key: String,
        /// Serialization backend of the missing record.
        backend: Backend,
    },

    /// A record with the same identity is already active (queued or
    /// running).
    #[error("active job record already exists for {name}/{key} ({backend})")]
    DuplicateKey {
        /// Model name of the conflicting record.
        name: String,
        /// Lookup key of the conflicting record.
        key: String,
        /// Serialization backend of the conflicting record.
        backend: Backend,
    },

    /// A delete matched more than one physical record and refuses to
    /// guess which one was meant.
    #[error("{count} records match {name}/{key} ({backend}); refusing to guess")]
    MultipleMatches {
        /// Model name used in the ambiguous lookup.
        name: String,
        /// Lookup key used in the ambiguous lookup.
        key: String,
        /// Serialization backend used in the ambiguous lookup.
        backend: Backend,
        /// Number of physical matches found.
        count: usize,
    },

    /// Attempted a state machine transition that is not allowed.
    ///
    /// This indicates a caller bug or a double-completion race: for
    /// example finalizing a job that is not `Running`.
    #[error("invalid transition from {from} to {to} for job {job_id}")]
    InvalidTransition {
        /// The record that was being transitioned.
        job_id: String,
        /// Current status of the record.
        from: JobStatus,
        /// Rejected target status.
        to: JobStatus,
    },

    /// The job has no loadable result in its current state.
    #[error("job {key} has no loadable result (status: {status})")]
    NotReady {
        /// Lookup key of the record.
        key: String,
        /// The record's current status.
        status: JobStatus,
    },

    /// The wrapped work function failed. The failure has already been
    /// recorded as an exception on the job record before this error is
    /// returned.
    #[error("work function failed: {0}")]
    WorkFailure(#[from] WorkFailure),

    /// An error occurred inside a result-session scope.
    ///
    /// The display is deliberately generic so internal error detail does
    /// not leak across the session boundary; the original cause is
    /// preserved in [`source`](std::error::Error::source) and as a
    /// persisted exception record.
    #[error("something went wrong during the session, see the recorded exception")]
    SessionFailure {
        /// The original scope failure.
        #[source]
        cause: WorkFailure,
    },

    /// The durable store failed. Not retried internally; surfaces
    /// immediately to the caller.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for JobError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, JobError>;

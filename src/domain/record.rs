//! Job record -- the durable representation of a unit of work.
//!
//! [`JobRecord`] is what the gateways persist. All status mutation goes
//! through the transition methods ([`mark_running`](JobRecord::mark_running),
//! [`complete`](JobRecord::complete), [`fail`](JobRecord::fail),
//! [`cancel`](JobRecord::cancel)) so the state machine and the
//! "result present iff `Done`" invariant are enforced in one place.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::end_time_sentinel;
use crate::error::JobError;
use crate::types::{Backend, JobStatus};

/// A failure captured during a job's lifetime.
///
/// Exception records are append-only: once recorded they are never
/// mutated, and they are deleted only together with their parent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    /// Categorical tag of the failure (e.g. the error type's name).
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
    /// When the failure was captured.
    pub recorded_at: DateTime<Utc>,
}

impl ExceptionRecord {
    /// Creates a record stamped with the current time.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// The persisted state of one tracked unit of work.
///
/// A record is identified two ways: `job_id` is globally unique and
/// assigned at creation; the `(name, key, backend)` triple is the
/// caller-visible identity used for lookups. At most one record per
/// triple may be active (queued or running) at a time -- the gateways
/// enforce this on create.
///
/// # Construction
///
/// [`JobRecord::new`] produces a `Queued` record owned by the creating
/// node, with `start_time` set to now and `end_time` holding the
/// far-future sentinel until a terminal transition stamps it:
///
/// ```
/// use mljobs::{Backend, JobRecord, JobStatus};
///
/// let record = JobRecord::new("revenue-model", "m1", Backend::Custom, "node-a");
/// assert_eq!(record.status, JobStatus::Queued);
/// assert_eq!(record.owner, "node-a");
/// assert!(record.result.is_none());
/// assert!(record.end_time > record.start_time);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Globally unique identifier, assigned at creation, immutable.
    pub job_id: String,

    /// Model name (caller-supplied).
    pub name: String,

    /// Lookup key (caller-supplied, e.g. a data hash).
    pub key: String,

    /// Serialization backend that will produce or did produce the result.
    pub backend: Backend,

    /// Identity of the node that created the record. Scopes orphan
    /// recovery so a restart does not fail jobs legitimately running
    /// elsewhere.
    pub owner: String,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// When the record was created.
    pub start_time: DateTime<Utc>,

    /// When the record reached a terminal state; the far-future sentinel
    /// while it has not.
    pub end_time: DateTime<Utc>,

    /// Result payload. Present iff `status == Done`.
    pub result: Option<Vec<u8>>,

    /// Key/value annotations; keys unique, last write per key wins.
    pub metadata: BTreeMap<String, String>,

    /// Failures captured during the job's lifetime, append-only.
    pub exceptions: Vec<ExceptionRecord>,
}

impl JobRecord {
    /// Creates a new `Queued` record owned by `owner`.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        backend: Backend,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            name: name.into(),
            key: key.into(),
            backend,
            owner: owner.into(),
            status: JobStatus::Queued,
            start_time: Utc::now(),
            end_time: end_time_sentinel(),
            result: None,
            metadata: BTreeMap::new(),
            exceptions: Vec::new(),
        }
    }

    /// Returns `true` if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transitions `Queued -> Running`.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidTransition`] unless the record is `Queued`.
    pub fn mark_running(&mut self) -> Result<(), JobError> {
        self.status
            .validate_transition(&self.job_id, JobStatus::Running)?;
        self.status = JobStatus::Running;
        Ok(())
    }

    /// Transitions `Running -> Done`, storing the result payload and
    /// stamping `end_time`.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidTransition`] unless the record is `Running`.
    /// This is the guard against double completion: whichever caller
    /// finalizes first wins, the second gets an error.
    pub fn complete(&mut self, payload: Vec<u8>) -> Result<(), JobError> {
        self.status
            .validate_transition(&self.job_id, JobStatus::Done)?;
        self.status = JobStatus::Done;
        self.result = Some(payload);
        self.end_time = Utc::now();
        Ok(())
    }

    /// Transitions `Running -> Failed`, stamping `end_time`.
    ///
    /// Does not record an exception by itself; callers that have failure
    /// detail attach it with [`record_exception`](Self::record_exception)
    /// first. Orphan recovery uses this transition without detail.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidTransition`] unless the record is `Running`.
    pub fn fail(&mut self) -> Result<(), JobError> {
        self.status
            .validate_transition(&self.job_id, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.end_time = Utc::now();
        Ok(())
    }

    /// Transitions to `Cancelled` from `Queued` or `Running`, stamping
    /// `end_time`.
    ///
    /// Cancellation is a best-effort marker: it does not interrupt a
    /// worker that is already executing.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidTransition`] from terminal states.
    pub fn cancel(&mut self) -> Result<(), JobError> {
        self.status
            .validate_transition(&self.job_id, JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.end_time = Utc::now();
        Ok(())
    }

    /// Appends an exception record. Append-only: existing entries are
    /// never touched.
    pub fn record_exception(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.exceptions.push(ExceptionRecord::new(kind, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new("model", "key-1", Backend::Custom, "node-a")
    }

    #[test]
    fn new_record_is_queued_with_sentinel_end_time() {
        let record = record();
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.end_time, end_time_sentinel());
        assert!(record.result.is_none());
        assert!(record.metadata.is_empty());
        assert!(record.exceptions.is_empty());
    }

    #[test]
    fn new_record_has_uuid_job_id() {
        let record = record();
        assert_eq!(record.job_id.len(), 36);
        assert!(record.job_id.contains('-'));
    }

    #[test]
    fn distinct_records_get_distinct_ids() {
        assert_ne!(record().job_id, record().job_id);
    }

    #[test]
    fn full_success_path() {
        let mut record = record();
        record.mark_running().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        record.complete(b"payload".to_vec()).unwrap();
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.result.as_deref(), Some(b"payload".as_slice()));
        assert!(record.end_time < end_time_sentinel());
    }

    #[test]
    fn failure_path_keeps_result_empty() {
        let mut record = record();
        record.mark_running().unwrap();
        record.record_exception("ValueError", "bad frame");
        record.fail().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.result.is_none());
        assert_eq!(record.exceptions.len(), 1);
        assert_eq!(record.exceptions[0].kind, "ValueError");
    }

    #[test]
    fn complete_from_queued_is_rejected() {
        let mut record = record();
        let err = record.complete(b"x".to_vec()).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        // the record is untouched
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.result.is_none());
    }

    #[test]
    fn double_completion_is_rejected() {
        let mut record = record();
        record.mark_running().unwrap();
        record.complete(b"first".to_vec()).unwrap();
        let err = record.complete(b"second".to_vec()).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(record.result.as_deref(), Some(b"first".as_slice()));
    }

    #[test]
    fn cancel_from_queued_and_running() {
        let mut queued = record();
        queued.cancel().unwrap();
        assert_eq!(queued.status, JobStatus::Cancelled);

        let mut running = record();
        running.mark_running().unwrap();
        running.cancel().unwrap();
        assert_eq!(running.status, JobStatus::Cancelled);
    }

    #[test]
    fn cancel_after_done_is_rejected() {
        let mut record = record();
        record.mark_running().unwrap();
        record.complete(vec![1]).unwrap();
        assert!(record.cancel().is_err());
    }

    #[test]
    fn metadata_upsert_last_write_wins() {
        let mut record = record();
        record.metadata.insert("epochs".to_string(), "10".to_string());
        record.metadata.insert("epochs".to_string(), "20".to_string());
        assert_eq!(record.metadata.len(), 1);
        assert_eq!(record.metadata.get("epochs").map(String::as_str), Some("20"));
    }

    #[test]
    fn exceptions_are_append_only() {
        let mut record = record();
        record.record_exception("A", "first");
        record.record_exception("B", "second");
        assert_eq!(record.exceptions.len(), 2);
        assert_eq!(record.exceptions[0].kind, "A");
        assert_eq!(record.exceptions[1].kind, "B");
    }
}

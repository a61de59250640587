//! Persistence gateways for job records.
//!
//! [`JobGateway`] is the single contract the rest of the crate programs
//! against. The two implementations are independent -- selected at
//! construction and usually carried as `Arc<dyn JobGateway>` -- not
//! subclasses of shared machinery:
//!
//! - [`FileGateway`](fs::FileGateway): one binary-encoded record file per
//!   `(name, key, backend)` triple in a configured directory.
//! - [`SqliteGateway`](sqlite::SqliteGateway): relational storage with
//!   one transaction per mutating call and a uniqueness constraint on
//!   active identities.
//!
//! Both must satisfy identical semantics; the integration tests run the
//! same battery against each.

pub mod fs;
pub mod sqlite;

use async_trait::async_trait;

pub use fs::FileGateway;
pub use sqlite::SqliteGateway;

use crate::domain::JobRecord;
use crate::error::Result;
use crate::types::{Backend, JobStatus};

/// Status filter for [`JobGateway::fetch`].
///
/// # Examples
///
/// ```
/// use mljobs::{JobStatus, StatusFilter};
///
/// assert!(StatusFilter::Any.matches(JobStatus::Queued));
/// assert!(StatusFilter::Only(JobStatus::Done).matches(JobStatus::Done));
/// assert!(!StatusFilter::Only(JobStatus::Done).matches(JobStatus::Failed));
///
/// let active = StatusFilter::OneOf(vec![JobStatus::Queued, JobStatus::Running]);
/// assert!(active.matches(JobStatus::Running));
/// assert!(!active.matches(JobStatus::Done));
/// ```
#[derive(Debug, Clone, Default)]
pub enum StatusFilter {
    /// Match any status.
    #[default]
    Any,
    /// Match exactly one status.
    Only(JobStatus),
    /// Match any status in the set.
    OneOf(Vec<JobStatus>),
}

impl StatusFilter {
    /// The filter matching records that are not yet terminal.
    pub fn active() -> Self {
        Self::OneOf(vec![JobStatus::Queued, JobStatus::Running])
    }

    /// Returns `true` if `status` passes the filter.
    pub fn matches(&self, status: JobStatus) -> bool {
        match self {
            Self::Any => true,
            Self::Only(wanted) => *wanted == status,
            Self::OneOf(set) => set.contains(&status),
        }
    }
}

/// The durable store for job records, metadata, and exceptions.
///
/// The gateway exclusively owns the persisted representation; callers
/// hold transient [`JobRecord`] copies and must re-fetch after every
/// mutating call to avoid acting on stale data.
///
/// # Semantics
///
/// - Lookup misses are not errors: [`fetch`](Self::fetch) returns
///   `Ok(None)`.
/// - Store failures surface immediately as
///   [`JobError::Storage`](crate::JobError::Storage); nothing is retried
///   internally.
/// - Relational implementations wrap every mutating call in a single
///   transaction; partial writes must not be observable.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; workers in other tasks reach
/// the same gateway through `Arc<dyn JobGateway>`.
#[async_trait]
pub trait JobGateway: Send + Sync {
    /// Idempotently ensures the backing store (directory or schema)
    /// exists.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`](crate::JobError::Storage) when the store
    /// cannot be created.
    async fn initialize(&self) -> Result<()>;

    /// Marks this owner's `Running` records as `Failed` with
    /// `end_time = now`, returning how many were recovered.
    ///
    /// Called on startup before any new job is accepted, so a record
    /// orphaned by a crashed process cannot race a fresh submission for
    /// the same identity. Zero recovered records is the normal case, not
    /// an error, and the scan is idempotent. Records owned by other
    /// nodes are never touched.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`](crate::JobError::Storage) on store failures.
    async fn recover_orphans(&self, owner: &str) -> Result<usize>;

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// - [`JobError::DuplicateKey`](crate::JobError::DuplicateKey) when an
    ///   active (queued or running) record already exists for the same
    ///   `(name, key, backend)` triple.
    /// - [`JobError::Storage`](crate::JobError::Storage) on store failures.
    async fn create(&self, record: &JobRecord) -> Result<()>;

    /// Returns the most recent record matching the identity triple and
    /// filter, ordered by `start_time` descending.
    ///
    /// Absence returns `Ok(None)` -- never an error.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`](crate::JobError::Storage) on store failures.
    async fn fetch(
        &self,
        name: &str,
        key: &str,
        backend: Backend,
        filter: StatusFilter,
    ) -> Result<Option<JobRecord>>;

    /// Persists the mutated fields of an existing record.
    ///
    /// Metadata is replaced wholesale (upsert, last write per key wins)
    /// and new exception entries are appended, in the same transaction
    /// as the record row for relational implementations.
    ///
    /// # Errors
    ///
    /// - [`JobError::NotFound`](crate::JobError::NotFound) when no record
    ///   with the given `job_id` exists.
    /// - [`JobError::Storage`](crate::JobError::Storage) on store failures.
    async fn update(&self, record: &JobRecord) -> Result<()>;

    /// Removes the record(s) matching the identity triple, along with
    /// their metadata and exceptions.
    ///
    /// The filesystem implementation refuses an ambiguous match
    /// ([`JobError::MultipleMatches`](crate::JobError::MultipleMatches))
    /// and reports zero matches as
    /// [`JobError::NotFound`](crate::JobError::NotFound); the relational
    /// implementation deletes all matches and treats zero as success.
    ///
    /// # Errors
    ///
    /// See above, plus [`JobError::Storage`](crate::JobError::Storage) on
    /// store failures.
    async fn delete(&self, name: &str, key: &str, backend: Backend) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert!(StatusFilter::Any.matches(status));
        }
    }

    #[test]
    fn only_matches_exactly_one() {
        let filter = StatusFilter::Only(JobStatus::Running);
        assert!(filter.matches(JobStatus::Running));
        assert!(!filter.matches(JobStatus::Queued));
    }

    #[test]
    fn one_of_matches_the_set() {
        let filter = StatusFilter::OneOf(vec![JobStatus::Done, JobStatus::Failed]);
        assert!(filter.matches(JobStatus::Done));
        assert!(filter.matches(JobStatus::Failed));
        assert!(!filter.matches(JobStatus::Running));
    }

    #[test]
    fn active_covers_queued_and_running_only() {
        let filter = StatusFilter::active();
        assert!(filter.matches(JobStatus::Queued));
        assert!(filter.matches(JobStatus::Running));
        assert!(!filter.matches(JobStatus::Done));
        assert!(!filter.matches(JobStatus::Failed));
        assert!(!filter.matches(JobStatus::Cancelled));
    }

    #[test]
    fn default_is_any() {
        assert!(matches!(StatusFilter::default(), StatusFilter::Any));
    }
}

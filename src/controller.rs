//! Lifecycle orchestration: enqueue, execute, finalize.
//!
//! [`LifecycleController`] drives the job state machine against a
//! [`JobGateway`]. The node identity used to scope orphan recovery is an
//! explicit constructor argument -- it is never read from ambient process
//! state, so multi-node behavior is deterministic under test.
//!
//! Work outcomes are modelled internally as
//! `Result<Vec<u8>, WorkFailure>`; [`execute`](LifecycleController::execute)
//! persists the outcome (result payload on success, exception record plus
//! `Failed` status on failure) and only then re-signals failure to the
//! caller. A failure is fatal to that one job, never to the controller.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::JobRecord;
use crate::error::{JobError, Result, WorkFailure};
use crate::gateway::{JobGateway, StatusFilter};
use crate::types::{Backend, JobStatus};

/// A unit of work: produces a result payload or fails with a categorized
/// failure. Arguments are captured by the closure.
pub type WorkFn = Box<dyn FnOnce() -> std::result::Result<Vec<u8>, WorkFailure> + Send + 'static>;

/// Transient handle to a job record.
///
/// The handle mirrors the latest known durable state; the controller
/// refreshes it from the gateway after every mutating call so callers
/// never act on stale data. Handles are cheap to rebuild: any process
/// can [`attach`](LifecycleController::attach) to a job by its
/// `(name, key, backend)` identity, which is what makes job identity
/// transferable across process boundaries.
#[derive(Debug)]
pub struct JobHandle {
    record: JobRecord,
    pending_meta: BTreeMap<String, String>,
}

impl JobHandle {
    fn new(record: JobRecord) -> Self {
        Self {
            record,
            pending_meta: BTreeMap::new(),
        }
    }

    /// The latest known state of the underlying record.
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// Model name of the job.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Lookup key of the job.
    pub fn key(&self) -> &str {
        &self.record.key
    }

    /// Serialization backend of the job.
    pub fn backend(&self) -> Backend {
        self.record.backend
    }

    /// Last known status.
    pub fn status(&self) -> JobStatus {
        self.record.status
    }

    /// Buffers a metadata entry in memory.
    ///
    /// Nothing is written until
    /// [`commit_meta`](LifecycleController::commit_meta); adding the same
    /// key twice before a commit overwrites the prior value (last write
    /// wins, no duplicate entries).
    pub fn add_meta(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pending_meta.insert(key.into(), value.into());
        self
    }

    /// Metadata entries buffered but not yet committed.
    pub fn pending_meta(&self) -> &BTreeMap<String, String> {
        &self.pending_meta
    }
}

/// Orchestrates job records through `Queued -> Running -> Done/Failed`.
///
/// # Concurrency
///
/// Callers serialize operations per job identity; operations on distinct
/// identities are independent and need no shared lock. Cross-process
/// coordination happens only through the durable store -- there is no
/// distributed locking here.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use mljobs::{Backend, FileGateway, JobStatus, LifecycleController};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let gateway = Arc::new(FileGateway::new(dir.path()));
/// let controller = LifecycleController::bootstrap(gateway, "node-a")
///     .await
///     .unwrap();
///
/// let mut handle = controller
///     .pre_start("revenue-model", "m1", Backend::Custom)
///     .await
///     .unwrap();
/// assert_eq!(handle.status(), JobStatus::Queued);
///
/// let payload = controller
///     .execute(&mut handle, Box::new(|| Ok(b"weights".to_vec())))
///     .await
///     .unwrap();
/// assert_eq!(payload, b"weights");
/// assert_eq!(handle.status(), JobStatus::Done);
/// # });
/// ```
pub struct LifecycleController {
    gateway: Arc<dyn JobGateway>,
    node: String,
}

impl LifecycleController {
    /// Initializes the store, recovers this node's orphaned `Running`
    /// records, and only then returns a usable controller.
    ///
    /// The ordering matters: recovery runs to completion before any new
    /// job can be accepted, so a resurrected `Running` record can never
    /// race a fresh submission for the same identity.
    ///
    /// # Errors
    ///
    /// Any gateway error from initialization or the recovery scan.
    pub async fn bootstrap(gateway: Arc<dyn JobGateway>, node: impl Into<String>) -> Result<Self> {
        let node = node.into();
        gateway.initialize().await?;
        let recovered = gateway.recover_orphans(&node).await?;
        tracing::debug!(recovered, node = %node, "controller bootstrapped");
        Ok(Self { gateway, node })
    }

    /// The node identity this controller stamps on new records.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The gateway this controller persists through.
    pub fn gateway(&self) -> Arc<dyn JobGateway> {
        Arc::clone(&self.gateway)
    }

    /// Creates a `Queued` record for the identity: one durable write.
    ///
    /// # Errors
    ///
    /// - [`JobError::DuplicateKey`] when an active record for the triple
    ///   already exists.
    /// - [`JobError::Storage`] on store failures.
    pub async fn pre_start(&self, name: &str, key: &str, backend: Backend) -> Result<JobHandle> {
        let record = JobRecord::new(name, key, backend, self.node.as_str());
        self.gateway.create(&record).await?;
        tracing::debug!(job_id = %record.job_id, name, key, backend = %backend, "job queued");
        Ok(JobHandle::new(record))
    }

    /// Rebuilds a handle from the most recent durable record for the
    /// identity.
    ///
    /// # Errors
    ///
    /// [`JobError::NotFound`] when no record exists.
    pub async fn attach(&self, name: &str, key: &str, backend: Backend) -> Result<JobHandle> {
        let record = self
            .gateway
            .fetch(name, key, backend, StatusFilter::Any)
            .await?
            .ok_or_else(|| JobError::NotFound {
                name: name.to_string(),
                key: key.to_string(),
                backend,
            })?;
        Ok(JobHandle::new(record))
    }

    /// Runs the work function, tracking it through the state machine.
    ///
    /// Transitions the record to `Running` (persisted before the work
    /// starts), invokes `work` on a blocking thread, then finalizes:
    ///
    /// - on success the record becomes `Done`, the returned payload is
    ///   persisted as the result, and `end_time` is stamped;
    /// - on failure (including a panicking work function) an exception
    ///   record is appended, the record becomes `Failed` with `end_time`
    ///   stamped, and the failure is re-signalled to the caller -- it is
    ///   both recorded and propagated, never swallowed.
    ///
    /// # Errors
    ///
    /// - [`JobError::InvalidTransition`] when the handle is not in the
    ///   expected source state (e.g. finalizing a job that is not
    ///   `Running`); this guards against double-completion races.
    /// - [`JobError::WorkFailure`] when the work function failed.
    /// - [`JobError::Storage`] on store failures.
    pub async fn execute(&self, handle: &mut JobHandle, work: WorkFn) -> Result<Vec<u8>> {
        handle.record.mark_running()?;
        self.gateway.update(&handle.record).await?;
        self.refresh(handle).await?;

        let outcome = run_work(work).await;

        match outcome {
            Ok(payload) => {
                handle.record.complete(payload.clone())?;
                self.gateway.update(&handle.record).await?;
                self.refresh(handle).await?;
                tracing::debug!(job_id = %handle.record.job_id, "job done");
                Ok(payload)
            }
            Err(failure) => {
                handle
                    .record
                    .record_exception(failure.kind.clone(), failure.message.clone());
                handle.record.fail()?;
                self.gateway.update(&handle.record).await?;
                self.refresh(handle).await?;
                tracing::debug!(
                    job_id = %handle.record.job_id,
                    kind = %failure.kind,
                    "job failed"
                );
                Err(JobError::WorkFailure(failure))
            }
        }
    }

    /// Returns the current status for the identity, or
    /// [`JobStatus::Unknown`] when no record exists. Absence is never an
    /// error; store failures still surface.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`] on store failures.
    pub async fn check_status(&self, name: &str, key: &str, backend: Backend) -> Result<JobStatus> {
        let record = self
            .gateway
            .fetch(name, key, backend, StatusFilter::Any)
            .await?;
        Ok(record.map_or(JobStatus::Unknown, |r| r.status))
    }

    /// Flushes the handle's buffered metadata as one batch write, then
    /// refreshes the handle. A no-op when nothing is buffered.
    ///
    /// # Errors
    ///
    /// - [`JobError::NotFound`] when the record no longer exists.
    /// - [`JobError::Storage`] on store failures.
    pub async fn commit_meta(&self, handle: &mut JobHandle) -> Result<()> {
        if handle.pending_meta.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut handle.pending_meta);
        handle.record.metadata.extend(pending);
        self.gateway.update(&handle.record).await?;
        self.refresh(handle).await
    }

    /// Fetches the `Done` record's result payload for the identity.
    ///
    /// Returns `None` when no `Done` record exists. Deserializing the
    /// payload is the caller's job, using the record's backend tag.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`] on store failures.
    pub async fn load(&self, name: &str, key: &str, backend: Backend) -> Result<Option<Vec<u8>>> {
        let record = self
            .gateway
            .fetch(name, key, backend, StatusFilter::Only(JobStatus::Done))
            .await?;
        Ok(record.and_then(|r| r.result))
    }

    /// Requests cancellation of a queued or running job.
    ///
    /// Best effort only: there is no cancellation propagation into a
    /// worker that is already executing. The marker is observed by the
    /// next status check.
    ///
    /// # Errors
    ///
    /// - [`JobError::NotFound`] when no record exists.
    /// - [`JobError::InvalidTransition`] when the record is already
    ///   terminal.
    /// - [`JobError::Storage`] on store failures.
    pub async fn request_cancel(&self, name: &str, key: &str, backend: Backend) -> Result<()> {
        let mut record = self
            .gateway
            .fetch(name, key, backend, StatusFilter::Any)
            .await?
            .ok_or_else(|| JobError::NotFound {
                name: name.to_string(),
                key: key.to_string(),
                backend,
            })?;
        record.cancel()?;
        self.gateway.update(&record).await?;
        tracing::debug!(job_id = %record.job_id, "cancellation recorded");
        Ok(())
    }

    async fn refresh(&self, handle: &mut JobHandle) -> Result<()> {
        let record = self
            .gateway
            .fetch(
                &handle.record.name,
                &handle.record.key,
                handle.record.backend,
                StatusFilter::Any,
            )
            .await?
            .ok_or_else(|| JobError::NotFound {
                name: handle.record.name.clone(),
                key: handle.record.key.clone(),
                backend: handle.record.backend,
            })?;
        handle.record = record;
        Ok(())
    }
}

/// Runs the work function on a blocking thread, mapping a panic to a
/// categorized failure so a misbehaving job cannot take the worker down.
async fn run_work(work: WorkFn) -> std::result::Result<Vec<u8>, WorkFailure> {
    match tokio::task::spawn_blocking(work).await {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => Err(WorkFailure::new(
            "Panic",
            format!("work function panicked: {join_err}"),
        )),
        Err(join_err) => Err(WorkFailure::new("Cancelled", join_err.to_string())),
    }
}

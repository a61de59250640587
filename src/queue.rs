//! Asynchronous submission of jobs to an execution queue.
//!
//! [`JobQueue`] is the boundary to the external queue broker: it accepts
//! a wrapped invocation and returns an opaque queue id. The crate makes
//! no assumption about the broker's retry policy beyond "delivers at
//! least once to some worker, eventually"; exactly-once execution is the
//! broker's promise, not enforced here.
//!
//! [`TokioJobQueue`] is the in-process implementation: it spawns the
//! invocation on the runtime under a bounded execution timeout. When the
//! timeout elapses the executor stops waiting and the record is left in
//! `Running` -- reconciled only by the next process restart's orphan
//! scan. That staleness window is by contract, not a bug.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::constants::DEFAULT_EXECUTION_TIMEOUT_SECS;
use crate::controller::{LifecycleController, WorkFn};
use crate::error::Result;
use crate::types::Backend;

/// Configuration for queue submission.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mljobs::QueueConfig;
///
/// let config = QueueConfig::default();
/// assert_eq!(config.execution_timeout, Duration::from_secs(7200));
///
/// let short = QueueConfig::default()
///     .with_execution_timeout(Duration::from_secs(60));
/// assert_eq!(short.execution_timeout, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Ceiling on a single invocation's wall-clock execution time.
    pub execution_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
        }
    }
}

impl QueueConfig {
    /// Sets the execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

/// A wrapped invocation handed to the queue.
///
/// Carries the job's durable identity rather than a live handle: the
/// worker that picks it up -- possibly in another process -- re-attaches
/// by `(name, key, backend)` and performs the `Running -> terminal`
/// transition itself against the same record.
pub struct QueuedJob {
    /// Model name of the job.
    pub name: String,
    /// Lookup key of the job.
    pub key: String,
    /// Serialization backend of the job.
    pub backend: Backend,
    /// The unit of work.
    pub work: WorkFn,
    /// Execution timeout for this invocation.
    pub timeout: Duration,
}

/// External asynchronous execution queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hands the invocation to the executor and returns an opaque queue
    /// id. Returning `Ok` means the invocation was accepted, not that it
    /// ran.
    ///
    /// # Errors
    ///
    /// Implementation-defined; a failed enqueue after the job record was
    /// created leaves that record `Queued`.
    async fn enqueue(&self, job: QueuedJob) -> Result<String>;
}

/// In-process queue that executes invocations on the tokio runtime.
pub struct TokioJobQueue {
    controller: Arc<LifecycleController>,
}

impl TokioJobQueue {
    /// Creates a queue executing against the given controller.
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<String> {
        let queue_id = Uuid::new_v4().to_string();
        let controller = Arc::clone(&self.controller);
        let id = queue_id.clone();

        tokio::spawn(async move {
            let QueuedJob {
                name,
                key,
                backend,
                work,
                timeout,
            } = job;

            let invocation = async {
                let mut handle = controller.attach(&name, &key, backend).await?;
                controller.execute(&mut handle, work).await.map(|_| ())
            };

            match tokio::time::timeout(timeout, invocation).await {
                Ok(Ok(())) => {
                    tracing::debug!(queue_id = %id, %name, %key, "queued job finished");
                }
                Ok(Err(err)) => {
                    // Already recorded durably by the controller.
                    tracing::debug!(queue_id = %id, %name, %key, error = %err, "queued job failed");
                }
                Err(_) => {
                    tracing::warn!(
                        queue_id = %id,
                        %name,
                        %key,
                        "execution timeout elapsed; record left running until the next restart's orphan scan"
                    );
                }
            }
        });

        Ok(queue_id)
    }
}

/// Receipt for a submitted job.
#[derive(Debug, Clone)]
pub struct JobTicket {
    /// Model name of the job.
    pub name: String,
    /// Lookup key of the job.
    pub key: String,
    /// Serialization backend of the job.
    pub backend: Backend,
    /// Opaque identifier assigned by the queue.
    pub queue_id: String,
}

/// Submits units of work for asynchronous execution.
///
/// `submit` performs the durable `pre_start` *before* handing anything
/// to the queue, so a queue failure can never reference a record that
/// does not exist. A failure after creation leaves a `Queued` record
/// behind for a monitoring pass to notice.
pub struct QueueAdapter<Q: JobQueue> {
    controller: Arc<LifecycleController>,
    queue: Q,
    config: QueueConfig,
}

impl<Q: JobQueue> QueueAdapter<Q> {
    /// Creates an adapter with the default configuration.
    pub fn new(controller: Arc<LifecycleController>, queue: Q) -> Self {
        Self {
            controller,
            queue,
            config: QueueConfig::default(),
        }
    }

    /// Overrides the queue configuration.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Durably creates the job record, then enqueues the invocation.
    ///
    /// # Errors
    ///
    /// - [`JobError::DuplicateKey`](crate::JobError::DuplicateKey) when
    ///   an active record for the triple already exists (nothing is
    ///   enqueued).
    /// - Any error from [`JobQueue::enqueue`]; the `Queued` record
    ///   remains.
    pub async fn submit(
        &self,
        name: &str,
        key: &str,
        backend: Backend,
        work: WorkFn,
    ) -> Result<JobTicket> {
        let handle = self.controller.pre_start(name, key, backend).await?;

        let job = QueuedJob {
            name: name.to_string(),
            key: key.to_string(),
            backend,
            work,
            timeout: self.config.execution_timeout,
        };

        match self.queue.enqueue(job).await {
            Ok(queue_id) => Ok(JobTicket {
                name: name.to_string(),
                key: key.to_string(),
                backend,
                queue_id,
            }),
            Err(err) => {
                tracing::warn!(
                    job_id = %handle.record().job_id,
                    name,
                    key,
                    error = %err,
                    "enqueue failed after the job record was created; record remains queued"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_two_hours() {
        assert_eq!(
            QueueConfig::default().execution_timeout,
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn with_execution_timeout_overrides() {
        let config = QueueConfig::default().with_execution_timeout(Duration::from_millis(50));
        assert_eq!(config.execution_timeout, Duration::from_millis(50));
    }
}

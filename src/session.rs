//! Scoped access to a completed job's result.
//!
//! [`ResultSession`] wraps one job record for the duration of a
//! consuming caller's logic. Failures anywhere inside the scope are
//! persisted as exception records and then re-signalled as an opaque
//! [`SessionFailure`](crate::JobError::SessionFailure) -- the caller
//! sees a generic error while the original cause stays available for
//! diagnostics through the error's source chain and the durable record.

use std::sync::Arc;

use crate::domain::JobRecord;
use crate::error::{JobError, Result, WorkFailure};
use crate::gateway::{JobGateway, StatusFilter};
use crate::types::{Artifact, Backend, JobStatus};

/// Scoped wrapper around one job record.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use mljobs::{Backend, FileGateway, JobGateway, JobRecord, ResultSession};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let gateway: Arc<dyn JobGateway> = Arc::new(FileGateway::new(dir.path()));
/// gateway.initialize().await.unwrap();
///
/// let mut record = JobRecord::new("m", "k", Backend::Custom, "node-a");
/// record.mark_running().unwrap();
/// record.complete(b"weights".to_vec()).unwrap();
/// gateway.create(&record).await.unwrap();
///
/// let mut session = ResultSession::open(gateway, "m", "k", Backend::Custom)
///     .await
///     .unwrap();
/// let artifact = session.get_result().await.unwrap();
/// assert_eq!(artifact.bytes(), b"weights");
/// # });
/// ```
pub struct ResultSession {
    gateway: Arc<dyn JobGateway>,
    record: JobRecord,
    artifact: Option<Artifact>,
}

impl std::fmt::Debug for ResultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSession")
            .field("record", &self.record)
            .field("artifact", &self.artifact)
            .finish_non_exhaustive()
    }
}

impl ResultSession {
    /// Opens a session over the most recent record for the identity.
    ///
    /// # Errors
    ///
    /// - [`JobError::NotFound`] when no record exists.
    /// - [`JobError::Storage`] on store failures.
    pub async fn open(
        gateway: Arc<dyn JobGateway>,
        name: &str,
        key: &str,
        backend: Backend,
    ) -> Result<Self> {
        let record = gateway
            .fetch(name, key, backend, StatusFilter::Any)
            .await?
            .ok_or_else(|| JobError::NotFound {
                name: name.to_string(),
                key: key.to_string(),
                backend,
            })?;
        Ok(Self {
            gateway,
            record,
            artifact: None,
        })
    }

    /// The record this session wraps.
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// The artifact materialized by [`get_result`](Self::get_result), if
    /// any. Released when a scope exits normally.
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Fetches and decodes the job's result artifact, caching the
    /// materialized form for the rest of the session.
    ///
    /// # Errors
    ///
    /// - [`JobError::NotReady`] unless the record is `Done` with a
    ///   persisted payload.
    /// - [`JobError::Storage`] when the payload fails the backend's
    ///   framing checks.
    pub async fn get_result(&mut self) -> Result<Artifact> {
        if let Some(artifact) = &self.artifact {
            return Ok(artifact.clone());
        }

        if self.record.status != JobStatus::Done {
            return Err(JobError::NotReady {
                key: self.record.key.clone(),
                status: self.record.status,
            });
        }
        let bytes = self.record.result.as_deref().ok_or(JobError::NotReady {
            key: self.record.key.clone(),
            status: self.record.status,
        })?;

        let artifact = self.record.backend.decode(bytes)?;
        self.artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Runs caller logic scoped to this session, consuming it.
    ///
    /// On normal exit the finalization hook releases the materialized
    /// artifact and the closure's value is returned. On failure, exactly
    /// one exception record (the failure's kind and message) is persisted
    /// against the job, then the caller receives an opaque
    /// [`JobError::SessionFailure`] -- internal error detail does not
    /// leak across the boundary, but the cause is preserved in
    /// [`source`](std::error::Error::source).
    ///
    /// # Errors
    ///
    /// [`JobError::SessionFailure`] when the closure fails.
    pub async fn scope<T, F>(mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, WorkFailure>,
    {
        match f(&mut self) {
            Ok(value) => {
                self.on_exit();
                Ok(value)
            }
            Err(failure) => {
                self.record
                    .record_exception(failure.kind.clone(), failure.message.clone());
                if let Err(update_err) = self.gateway.update(&self.record).await {
                    // The wrapped failure still reaches the caller even
                    // when the store refuses the exception record.
                    tracing::error!(
                        job_id = %self.record.job_id,
                        error = %update_err,
                        "failed to persist session exception"
                    );
                }
                Err(JobError::SessionFailure { cause: failure })
            }
        }
    }

    fn on_exit(&mut self) {
        self.artifact = None;
    }
}

//! Durable lifecycle tracking for machine-learning training and serving
//! jobs.
//!
//! A job is one tracked unit of asynchronous work (a model training or
//! inference run). This crate persists its submission, execution, status
//! transitions, result payload, and failures, and recovers jobs orphaned
//! by a crashed process:
//!
//! ```text
//! Queued --start--> Running --success--> Done
//!                   Running --failure--> Failed
//! Queued/Running --cancel--> Cancelled
//! ```
//!
//! On startup, records left in `Running` by a previous instance of the
//! same node are marked `Failed` before any new work is accepted.
//!
//! # Module Organization
//!
//! - [`types`] - lifecycle status state machine and serialization backends
//! - [`domain`] - the persisted [`JobRecord`] and its invariants
//! - [`gateway`] - the [`JobGateway`] store contract; filesystem and
//!   SQLite implementations
//! - [`controller`] - [`LifecycleController`]: enqueue, execute, finalize
//! - [`queue`] - [`QueueAdapter`] and the external-queue boundary
//! - [`session`] - [`ResultSession`]: scoped consumer access to results
//! - [`error`] - [`JobError`] taxonomy and the crate [`Result`] alias
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use mljobs::{Backend, JobStatus, LifecycleController, SqliteGateway};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let gateway = Arc::new(SqliteGateway::open_in_memory().unwrap());
//! let controller = LifecycleController::bootstrap(gateway, "node-a")
//!     .await
//!     .unwrap();
//!
//! let mut handle = controller
//!     .pre_start("revenue-model", "2026-08", Backend::Custom)
//!     .await
//!     .unwrap();
//!
//! controller
//!     .execute(&mut handle, Box::new(|| Ok(b"model-bytes".to_vec())))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(handle.status(), JobStatus::Done);
//! let payload = controller
//!     .load("revenue-model", "2026-08", Backend::Custom)
//!     .await
//!     .unwrap();
//! assert_eq!(payload.as_deref(), Some(b"model-bytes".as_slice()));
//! # });
//! ```

pub mod constants;
pub mod controller;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod session;
pub mod types;

pub use controller::{JobHandle, LifecycleController, WorkFn};
pub use domain::{ExceptionRecord, JobRecord};
pub use error::{JobError, Result, WorkFailure};
pub use gateway::{FileGateway, JobGateway, SqliteGateway, StatusFilter};
pub use queue::{JobQueue, JobTicket, QueueAdapter, QueueConfig, QueuedJob, TokioJobQueue};
pub use session::ResultSession;
pub use types::{Artifact, Backend, JobStatus};

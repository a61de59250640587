//! Domain model: the persisted representation of a unit of work.

pub mod record;

pub use record::{ExceptionRecord, JobRecord};

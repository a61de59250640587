//! Job lifecycle status and its state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Lifecycle status of a job record.
///
/// A job progresses monotonically through the state machine; terminal
/// states are final.
///
/// # State Machine
///
/// ```text
/// Queued  -> Running, Cancelled
/// Running -> Done, Failed, Cancelled
/// Done    -> (terminal, no transitions)
/// Failed  -> (terminal, no transitions)
/// Cancelled -> (terminal, no transitions)
/// ```
///
/// `Unknown` is the sentinel returned by status queries when no record
/// exists; it is never persisted and allows no transitions.
///
/// # Examples
///
/// ```
/// use mljobs::JobStatus;
///
/// assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
/// assert!(!JobStatus::Queued.can_transition_to(JobStatus::Done));
/// assert!(JobStatus::Done.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created and durably recorded, waiting for a worker.
    Queued,
    /// Picked up by a worker; the work function is executing.
    Running,
    /// Completed successfully; the result payload is persisted (terminal).
    Done,
    /// The work function failed or the record was orphan-recovered (terminal).
    Failed,
    /// Cancellation was requested before completion (terminal).
    Cancelled,
    /// No record exists for the queried identity. Never persisted.
    Unknown,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobStatus {
    /// Returns the canonical string form, as stored by the relational
    /// gateway.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Unknown => "Unknown",
        }
    }

    /// Parses the canonical string form. Returns `None` for anything else.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Queued" => Some(Self::Queued),
            "Running" => Some(Self::Running),
            "Done" => Some(Self::Done),
            "Failed" => Some(Self::Failed),
            "Cancelled" => Some(Self::Cancelled),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns `true` if this status is terminal (no further transitions).
    ///
    /// # Examples
    ///
    /// ```
    /// use mljobs::JobStatus;
    ///
    /// assert!(!JobStatus::Queued.is_terminal());
    /// assert!(!JobStatus::Running.is_terminal());
    /// assert!(JobStatus::Done.is_terminal());
    /// assert!(JobStatus::Failed.is_terminal());
    /// assert!(JobStatus::Cancelled.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if transitioning from this status to `next` is valid.
    ///
    /// Self-transitions are rejected; terminal states and `Unknown`
    /// reject everything.
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => matches!(next, Self::Done | Self::Failed | Self::Cancelled),
            Self::Done | Self::Failed | Self::Cancelled | Self::Unknown => false,
        }
    }

    /// Validates a transition, returning [`JobError::InvalidTransition`]
    /// with the record's identity on rejection.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidTransition`] when the state machine forbids
    /// moving from this status to `next`.
    pub fn validate_transition(&self, job_id: &str, next: Self) -> Result<(), JobError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(JobError::InvalidTransition {
                job_id: job_id.to_string(),
                from: *self,
                to: next,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Unknown,
    ];

    #[test]
    fn display_matches_as_str() {
        for status in ALL {
            assert_eq!(status.to_string(), status.as_str());
        }
    }

    #[test]
    fn parse_round_trips_canonical_strings() {
        for status in ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
        assert_eq!(JobStatus::parse(""), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Unknown.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn queued_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn running_transitions() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn terminal_states_reject_all_transitions() {
        for terminal in [JobStatus::Done, JobStatus::Failed, JobStatus::Cancelled] {
            for target in ALL {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} should not transition to {target}"
                );
            }
        }
    }

    #[test]
    fn unknown_rejects_all_transitions() {
        for target in ALL {
            assert!(!JobStatus::Unknown.can_transition_to(target));
        }
    }

    #[test]
    fn validate_transition_carries_context() {
        let err = JobStatus::Done
            .validate_transition("job-9", JobStatus::Running)
            .unwrap_err();
        match err {
            JobError::InvalidTransition { job_id, from, to } => {
                assert_eq!(job_id, "job-9");
                assert_eq!(from, JobStatus::Done);
                assert_eq!(to, JobStatus::Running);
            }
            other => panic!("expected InvalidTransition, got: {other}"),
        }
    }

    #[test]
    fn validate_transition_ok() {
        assert!(JobStatus::Queued
            .validate_transition("job-1", JobStatus::Running)
            .is_ok());
    }
}

//! Job lifecycle status.
//!
//! Statuses are ordered: `Accepted < Running < {Successful, Failed, Dismissed}`.
//! The three terminal statuses share the highest rank; once a job reaches
//! one of them its status is frozen.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status wire value for [`JobStatus::Accepted`].
pub const ACCEPTED: &str = "accepted";
/// Status wire value for [`JobStatus::Running`].
pub const RUNNING: &str = "running";
/// Status wire value for [`JobStatus::Successful`].
pub const SUCCESSFUL: &str = "successful";
/// Status wire value for [`JobStatus::Failed`].
pub const FAILED: &str = "failed";
/// Status wire value for [`JobStatus::Dismissed`].
pub const DISMISSED: &str = "dismissed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Running,
    Successful,
    Failed,
    Dismissed,
}

impl JobStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Accepted,
        JobStatus::Running,
        JobStatus::Successful,
        JobStatus::Failed,
        JobStatus::Dismissed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => ACCEPTED,
            Self::Running => RUNNING,
            Self::Successful => SUCCESSFUL,
            Self::Failed => FAILED,
            Self::Dismissed => DISMISSED,
        }
    }

    /// `true` for Successful, Failed and Dismissed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Dismissed)
    }

    /// Position in the lifecycle. Terminal statuses share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::Running => 1,
            Self::Successful | Self::Failed | Self::Dismissed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Nothing leaves a terminal status, and a non-terminal status only
    /// moves to a strictly later one. Duplicates and regressions are refused.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            ACCEPTED => Ok(Self::Accepted),
            RUNNING => Ok(Self::Running),
            SUCCESSFUL => Ok(Self::Successful),
            FAILED => Ok(Self::Failed),
            DISMISSED => Ok(Self::Dismissed),
            other => Err(CoreError::Validation(format!(
                "Unknown job status '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Accepted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Successful.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Dismissed.is_terminal());
    }

    #[test]
    fn forward_transitions_allowed() {
        assert!(JobStatus::Accepted.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Accepted.can_transition_to(JobStatus::Dismissed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Successful));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn nothing_leaves_a_terminal_status() {
        for from in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be refused");
            }
        }
    }

    #[test]
    fn duplicates_and_regressions_refused() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Accepted));
        assert!(!JobStatus::Accepted.can_transition_to(JobStatus::Accepted));
    }

    #[test]
    fn parse_round_trips_wire_values() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("SUCCESSFUL".parse::<JobStatus>().unwrap(), JobStatus::Successful);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&JobStatus::Dismissed).unwrap();
        assert_eq!(json, "\"dismissed\"");
        let parsed: JobStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(parsed, JobStatus::Running);
    }
}

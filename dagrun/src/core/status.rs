//! Task and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a single task within a run.
///
/// Legal transitions: `Pending -> Running -> {Succeeded | Failed}` with a
/// `Retrying` loop between `Running` and its terminal states, `Skipped`
/// reachable from `Pending` when a blocking upstream fails, and `Aborted`
/// reachable from any non-terminal state when the run is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet eligible to run.
    #[default]
    Pending,
    /// The action is currently executing.
    Running,
    /// The last attempt failed; waiting out the retry delay.
    Retrying,
    /// The action completed successfully.
    Succeeded,
    /// All attempts exhausted without success.
    Failed,
    /// Never ran because a blocking upstream terminated unsuccessfully.
    Skipped,
    /// The run was aborted before this task could finish.
    Aborted,
}

impl TaskStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Aborted
        )
    }

    /// Returns true if a downstream task may start on top of this status.
    ///
    /// A failed upstream satisfies its dependents only when the task is
    /// marked `soft_fail`; its own failure stays recorded either way.
    #[must_use]
    pub fn satisfies_downstream(self, soft_fail: bool) -> bool {
        match self {
            Self::Succeeded => true,
            Self::Failed => soft_fail,
            _ => false,
        }
    }

    /// Returns true if this terminal status blocks dependents outright.
    #[must_use]
    pub fn blocks_downstream(self, soft_fail: bool) -> bool {
        self.is_terminal() && !self.satisfies_downstream(soft_fail)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// The terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task terminal; no non-soft task failed.
    Success,
    /// At least one non-soft task failed.
    Failed,
    /// The run was aborted before completion.
    Aborted,
}

impl RunOutcome {
    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(TaskStatus::Aborted.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_soft_fail_satisfies_downstream() {
        assert!(TaskStatus::Succeeded.satisfies_downstream(false));
        assert!(!TaskStatus::Failed.satisfies_downstream(false));
        assert!(TaskStatus::Failed.satisfies_downstream(true));
        assert!(!TaskStatus::Skipped.satisfies_downstream(true));
    }

    #[test]
    fn test_blocking_statuses() {
        assert!(TaskStatus::Failed.blocks_downstream(false));
        assert!(!TaskStatus::Failed.blocks_downstream(true));
        assert!(TaskStatus::Skipped.blocks_downstream(false));
        assert!(TaskStatus::Aborted.blocks_downstream(false));
        assert!(!TaskStatus::Running.blocks_downstream(false));
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(json, r#""retrying""#);
        let back: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskStatus::Retrying);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RunOutcome::Success.to_string(), "success");
        assert_eq!(RunOutcome::Failed.to_string(), "failed");
        assert_eq!(RunOutcome::Aborted.to_string(), "aborted");
    }
}

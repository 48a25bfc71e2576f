//! Observable events emitted while a run advances.

use crate::core::{RunOutcome, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single task state transition.
///
/// One transition is emitted for every edge the per-task state machine
/// takes, so external collaborators can reconstruct the full history of a
/// run from the event stream alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTransition {
    /// The run this transition belongs to.
    pub run_id: Uuid,
    /// The task that changed state.
    pub task: String,
    /// The state the task left.
    pub from: TaskStatus,
    /// The state the task entered.
    pub to: TaskStatus,
    /// The attempt number in flight (1-based; 0 before the first attempt).
    pub attempt: u32,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// The error that drove the transition, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskTransition {
    /// Creates a new transition stamped with the current time.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        task: impl Into<String>,
        from: TaskStatus,
        to: TaskStatus,
        attempt: u32,
    ) -> Self {
        Self {
            run_id,
            task: task.into(),
            from,
            to,
            attempt,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Attaches the error that caused this transition.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Lifecycle events produced by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run started executing.
    RunStarted {
        /// The run that started.
        run_id: Uuid,
        /// The graph being executed.
        pipeline: String,
        /// When execution began.
        timestamp: DateTime<Utc>,
    },
    /// A task changed state.
    TaskTransition(TaskTransition),
    /// A run reached its terminal outcome.
    RunFinished {
        /// The run that finished.
        run_id: Uuid,
        /// The terminal outcome.
        outcome: RunOutcome,
        /// When the outcome was recorded.
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    /// Creates a run-started event stamped with the current time.
    #[must_use]
    pub fn started(run_id: Uuid, pipeline: impl Into<String>) -> Self {
        Self::RunStarted {
            run_id,
            pipeline: pipeline.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a run-finished event stamped with the current time.
    #[must_use]
    pub fn finished(run_id: Uuid, outcome: RunOutcome) -> Self {
        Self::RunFinished {
            run_id,
            outcome,
            timestamp: Utc::now(),
        }
    }

    /// Returns the run this event belongs to.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. } | Self::RunFinished { run_id, .. } => *run_id,
            Self::TaskTransition(t) => t.run_id,
        }
    }

    /// Returns the inner transition, if this is a transition event.
    #[must_use]
    pub fn as_transition(&self) -> Option<&TaskTransition> {
        match self {
            Self::TaskTransition(t) => Some(t),
            _ => None,
        }
    }
}

impl From<TaskTransition> for RunEvent {
    fn from(transition: TaskTransition) -> Self {
        Self::TaskTransition(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_creation() {
        let run_id = Uuid::new_v4();
        let t = TaskTransition::new(run_id, "build", TaskStatus::Pending, TaskStatus::Running, 1);
        assert_eq!(t.run_id, run_id);
        assert_eq!(t.task, "build");
        assert_eq!(t.from, TaskStatus::Pending);
        assert_eq!(t.to, TaskStatus::Running);
        assert!(t.error.is_none());
    }

    #[test]
    fn test_transition_with_error() {
        let t = TaskTransition::new(
            Uuid::new_v4(),
            "freshness",
            TaskStatus::Running,
            TaskStatus::Retrying,
            1,
        )
        .with_error("stale source");
        assert_eq!(t.error.as_deref(), Some("stale source"));
    }

    #[test]
    fn test_event_run_id() {
        let run_id = Uuid::new_v4();
        let started = RunEvent::started(run_id, "nightly");
        let finished = RunEvent::finished(run_id, RunOutcome::Success);
        assert_eq!(started.run_id(), run_id);
        assert_eq!(finished.run_id(), run_id);
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let event: RunEvent = TaskTransition::new(
            Uuid::new_v4(),
            "seed",
            TaskStatus::Running,
            TaskStatus::Succeeded,
            2,
        )
        .into();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"task_transition""#));
        let back: RunEvent = serde_json::from_str(&json).unwrap();
        assert!(back.as_transition().is_some());
    }
}

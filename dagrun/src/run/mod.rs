//! Runs: one execution instance of a task graph.

use crate::core::{RunOutcome, TaskStatus};
use crate::graph::TaskGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-task execution state within a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    /// Current status.
    pub status: TaskStatus,
    /// Attempts actually made so far.
    pub attempt_count: u32,
    /// The most recent attempt error, if any.
    pub last_error: Option<String>,
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
}

/// One execution instance of a task graph.
///
/// Created by the trigger (or a manual request), mutated exclusively by the
/// executor, and immutable once `outcome` is set.
#[derive(Debug)]
pub struct Run {
    /// Unique per instantiation.
    pub id: Uuid,
    /// The graph being executed; shared and immutable for the run's lifetime.
    pub graph: Arc<TaskGraph>,
    /// Per-task state, keyed by task name.
    pub task_states: HashMap<String, TaskState>,
    /// When the run was instantiated.
    pub started_at: DateTime<Utc>,
    /// When the run reached its outcome.
    pub ended_at: Option<DateTime<Utc>>,
    /// Terminal outcome; `None` while in flight.
    pub outcome: Option<RunOutcome>,
    /// The schedule slot this run covers; `None` for manual runs.
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Run {
    /// Instantiates a manual run with every task `Pending`.
    #[must_use]
    pub fn new(graph: Arc<TaskGraph>) -> Self {
        let task_states = graph
            .task_names()
            .iter()
            .map(|name| (name.clone(), TaskState::default()))
            .collect();

        Self {
            id: Uuid::new_v4(),
            graph,
            task_states,
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
            scheduled_for: None,
        }
    }

    /// Instantiates a run for a specific schedule slot.
    #[must_use]
    pub fn scheduled(graph: Arc<TaskGraph>, fire_time: DateTime<Utc>) -> Self {
        let mut run = Self::new(graph);
        run.scheduled_for = Some(fire_time);
        run
    }

    /// Returns true if this run was created by the schedule.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_for.is_some()
    }

    /// Returns true once every task is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.task_states.values().all(|s| s.status.is_terminal())
    }

    /// Computes the run outcome from terminal task states.
    ///
    /// `Success` unless a non-soft task failed; aborts dominate only when no
    /// failure explains them (an externally aborted run has no failed task).
    #[must_use]
    pub fn compute_outcome(&self) -> RunOutcome {
        let mut aborted = false;
        for (name, state) in &self.task_states {
            match state.status {
                TaskStatus::Failed => {
                    let soft = self.graph.task(name).is_some_and(|t| t.soft_fail);
                    if !soft {
                        return RunOutcome::Failed;
                    }
                }
                TaskStatus::Aborted => aborted = true,
                TaskStatus::Skipped => {
                    // A skip always traces back to a blocking failure or an
                    // abort; the source determines the outcome.
                }
                _ => {}
            }
        }
        if aborted {
            RunOutcome::Aborted
        } else {
            RunOutcome::Success
        }
    }

    /// Freezes the run with the given outcome.
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.ended_at = Some(Utc::now());
    }

    /// Snapshots the run into a serializable record.
    #[must_use]
    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            run_id: self.id,
            pipeline: self.graph.name().to_string(),
            outcome: self.outcome,
            task_states: self.task_states.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            scheduled_for: self.scheduled_for,
        }
    }
}

/// The terminal record of a run, consumed by downstream reporting
/// collaborators once `outcome` is `Success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// The run ID.
    pub run_id: Uuid,
    /// The graph name.
    pub pipeline: String,
    /// Terminal outcome; `None` while the run is still in flight.
    pub outcome: Option<RunOutcome>,
    /// Final per-task states.
    pub task_states: HashMap<String, TaskState>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// The schedule slot, if any.
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Returns the final status of a task, if recorded.
    #[must_use]
    pub fn task_status(&self, name: &str) -> Option<TaskStatus> {
        self.task_states.get(name).map(|s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NoOpAction, Task};

    fn graph_with(tasks: &[(&str, bool)]) -> Arc<TaskGraph> {
        let mut graph = TaskGraph::new("test");
        for (name, soft) in tasks {
            let mut task = Task::new(*name, Arc::new(NoOpAction));
            if *soft {
                task = task.soft_fail();
            }
            graph.add_task(task).unwrap();
        }
        Arc::new(graph)
    }

    fn set_status(run: &mut Run, name: &str, status: TaskStatus) {
        run.task_states.get_mut(name).unwrap().status = status;
    }

    #[test]
    fn test_new_run_all_pending() {
        let run = Run::new(graph_with(&[("a", false), ("b", false)]));
        assert_eq!(run.task_states.len(), 2);
        assert!(run
            .task_states
            .values()
            .all(|s| s.status == TaskStatus::Pending));
        assert!(!run.is_complete());
        assert!(run.outcome.is_none());
        assert!(!run.is_scheduled());
    }

    #[test]
    fn test_outcome_success() {
        let mut run = Run::new(graph_with(&[("a", false), ("b", false)]));
        set_status(&mut run, "a", TaskStatus::Succeeded);
        set_status(&mut run, "b", TaskStatus::Succeeded);
        assert!(run.is_complete());
        assert_eq!(run.compute_outcome(), RunOutcome::Success);
    }

    #[test]
    fn test_outcome_soft_fail_tolerated() {
        let mut run = Run::new(graph_with(&[("freshness", true), ("build", false)]));
        set_status(&mut run, "freshness", TaskStatus::Failed);
        set_status(&mut run, "build", TaskStatus::Succeeded);
        assert_eq!(run.compute_outcome(), RunOutcome::Success);
    }

    #[test]
    fn test_outcome_hard_fail() {
        let mut run = Run::new(graph_with(&[("build", false), ("test", false)]));
        set_status(&mut run, "build", TaskStatus::Failed);
        set_status(&mut run, "test", TaskStatus::Skipped);
        assert_eq!(run.compute_outcome(), RunOutcome::Failed);
    }

    #[test]
    fn test_outcome_aborted_without_failure() {
        let mut run = Run::new(graph_with(&[("a", false), ("b", false)]));
        set_status(&mut run, "a", TaskStatus::Succeeded);
        set_status(&mut run, "b", TaskStatus::Aborted);
        assert_eq!(run.compute_outcome(), RunOutcome::Aborted);
    }

    #[test]
    fn test_failure_dominates_abort() {
        let mut run = Run::new(graph_with(&[("a", false), ("b", false)]));
        set_status(&mut run, "a", TaskStatus::Failed);
        set_status(&mut run, "b", TaskStatus::Aborted);
        assert_eq!(run.compute_outcome(), RunOutcome::Failed);
    }

    #[test]
    fn test_record_snapshot() {
        let graph = graph_with(&[("a", false)]);
        let mut run = Run::scheduled(graph, Utc::now());
        set_status(&mut run, "a", TaskStatus::Succeeded);
        run.finish(RunOutcome::Success);

        let record = run.to_record();
        assert_eq!(record.run_id, run.id);
        assert_eq!(record.pipeline, "test");
        assert_eq!(record.outcome, Some(RunOutcome::Success));
        assert_eq!(record.task_status("a"), Some(TaskStatus::Succeeded));
        assert!(record.scheduled_for.is_some());

        let json = serde_json::to_string(&record).unwrap();
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, record.run_id);
    }
}

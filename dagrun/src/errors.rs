//! Error types for the dagrun scheduling core.
//!
//! Graph construction errors (`DuplicateTaskError`, `UnknownTaskError`,
//! `CycleError`) are fatal: the caller must fix the graph before any run can
//! start. Action failures are recovered locally via retry and never cross a
//! task boundary; they surface only in the failed task's recorded state.

use thiserror::Error;
use uuid::Uuid;

/// The main error type for dagrun operations.
#[derive(Debug, Error)]
pub enum DagrunError {
    /// A task name was registered twice in one graph.
    #[error("{0}")]
    DuplicateTask(#[from] DuplicateTaskError),

    /// A dependency referenced a task that does not exist.
    #[error("{0}")]
    UnknownTask(#[from] UnknownTaskError),

    /// A dependency edge would close a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// A run was aborted before completion.
    #[error("{0}")]
    RunAborted(#[from] RunAbortedError),

    /// The trigger refused to admit a run.
    #[error("{0}")]
    Admission(#[from] AdmissionRefusedError),

    /// A run store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when adding a task whose name is already taken.
#[derive(Debug, Clone, Error)]
#[error("duplicate task '{name}' in graph '{graph}'")]
pub struct DuplicateTaskError {
    /// The conflicting task name.
    pub name: String,
    /// The graph the task was added to.
    pub graph: String,
}

impl DuplicateTaskError {
    /// Creates a new duplicate task error.
    #[must_use]
    pub fn new(name: impl Into<String>, graph: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: graph.into(),
        }
    }
}

/// Error raised when a dependency endpoint does not name a known task.
#[derive(Debug, Clone, Error)]
#[error("unknown task '{name}' in graph '{graph}'")]
pub struct UnknownTaskError {
    /// The missing task name.
    pub name: String,
    /// The graph that was queried.
    pub graph: String,
}

impl UnknownTaskError {
    /// Creates a new unknown task error.
    #[must_use]
    pub fn new(name: impl Into<String>, graph: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: graph.into(),
        }
    }
}

/// Error raised when a dependency edge would create a cycle.
///
/// The path runs along existing edges from the proposed downstream task back
/// to the proposed upstream task, so `path.first()` and `path.last()` name
/// the two endpoints of the rejected edge.
#[derive(Debug, Clone, Error)]
#[error("dependency cycle: {}", path.join(" -> "))]
pub struct CycleError {
    /// The task names forming the cycle.
    pub path: Vec<String>,
}

impl CycleError {
    /// Creates a new cycle error from the offending path.
    #[must_use]
    pub fn new(path: Vec<String>) -> Self {
        Self { path }
    }
}

/// Error describing a failed action attempt.
///
/// Action errors are task-local: the executor retries them up to the task's
/// `max_attempts` and then records the message as the task's `last_error`.
/// They are never raised into sibling tasks or the trigger.
#[derive(Debug, Clone, Error)]
#[error("action failed: {message}")]
pub struct ActionError {
    /// Human-readable failure description.
    pub message: String,
}

impl ActionError {
    /// Creates a new action error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` keeps the context chain in one line.
        Self {
            message: format!("{err:#}"),
        }
    }
}

/// Error raised when a run is aborted by external request or a fail-fast
/// cascade.
#[derive(Debug, Clone, Error)]
#[error("run {run_id} aborted: {reason}")]
pub struct RunAbortedError {
    /// The aborted run.
    pub run_id: Uuid,
    /// Why the run was aborted.
    pub reason: String,
}

impl RunAbortedError {
    /// Creates a new run aborted error.
    #[must_use]
    pub fn new(run_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            reason: reason.into(),
        }
    }
}

/// Error raised when the trigger refuses to admit a new run.
#[derive(Debug, Clone, Error)]
#[error("run admission refused: {reason}")]
pub struct AdmissionRefusedError {
    /// Why admission was refused.
    pub reason: String,
}

impl AdmissionRefusedError {
    /// Creates a new admission refused error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

//! Tasks and the actions they execute.
//!
//! A [`Task`] pairs a unique name with an opaque [`Action`] and the policy
//! for retrying it. The core never interprets what an action does; it only
//! observes whether each attempt succeeded or failed.

mod retry;

pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};

use crate::cancellation::CancellationToken;
use async_trait::async_trait;
use std::fmt::Debug;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::info;
use uuid::Uuid;

/// Execution context handed to an action for one attempt.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// The run this attempt belongs to.
    pub run_id: Uuid,
    /// The task being executed.
    pub task_name: String,
    /// The attempt number (1-based).
    pub attempt: u32,
    /// Cooperative cancellation signal for the enclosing run.
    pub cancel: CancellationToken,
}

impl ActionContext {
    /// Returns true if the enclosing run has requested cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// An opaque unit of work.
///
/// Long-running actions should poll `ctx.is_cancelled()` (or await
/// `ctx.cancel.cancelled()`) at convenient points; the executor requests
/// cancellation cooperatively and does not guarantee forceful termination.
#[async_trait]
pub trait Action: Send + Sync + Debug {
    /// Executes one attempt of the work.
    async fn run(&self, ctx: &ActionContext) -> anyhow::Result<()>;
}

/// An action that does nothing and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAction;

#[async_trait]
impl Action for NoOpAction {
    async fn run(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A closure-based action.
pub struct FnAction<F>
where
    F: Fn(&ActionContext) -> anyhow::Result<()> + Send + Sync,
{
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ActionContext) -> anyhow::Result<()> + Send + Sync,
{
    /// Creates a new closure-based action.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnAction<F>
where
    F: Fn(&ActionContext) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&ActionContext) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}

/// An action that runs a command line through the platform shell.
///
/// Succeeds iff the process exits with status zero. The child is killed if
/// the attempt future is dropped (run abort), which is the closest a
/// cooperative core gets to tearing the work down.
#[derive(Debug, Clone)]
pub struct ShellAction {
    command: String,
}

impl ShellAction {
    /// Creates a shell action from a command line.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Returns the command line.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Action for ShellAction {
    async fn run(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        use anyhow::Context as _;

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.command);
            c
        };

        cmd.stdin(Stdio::null()).kill_on_drop(true);

        info!(task = %ctx.task_name, attempt = ctx.attempt, cmd = %self.command, "starting task process");

        let status = cmd
            .status()
            .await
            .with_context(|| format!("spawning process for task '{}'", ctx.task_name))?;

        if status.success() {
            Ok(())
        } else {
            anyhow::bail!(
                "command exited with status {}",
                status.code().unwrap_or(-1)
            )
        }
    }
}

/// A unit of pipeline work: a named action plus its retry policy.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique name within a graph.
    pub name: String,
    /// The work to execute; the core treats it as opaque.
    pub action: Arc<dyn Action>,
    /// How failed attempts are retried.
    pub retry_policy: RetryPolicy,
    /// If true, a terminal failure does not block dependents or the run.
    pub soft_fail: bool,
}

impl Task {
    /// Creates a task with the default retry policy.
    #[must_use]
    pub fn new(name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            action,
            retry_policy: RetryPolicy::default(),
            soft_fail: false,
        }
    }

    /// Creates a task around a shell command line.
    #[must_use]
    pub fn shell(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(name, Arc::new(ShellAction::new(command)))
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Marks the task as tolerated-on-failure.
    #[must_use]
    pub fn soft_fail(mut self) -> Self {
        self.soft_fail = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> ActionContext {
        ActionContext {
            run_id: Uuid::new_v4(),
            task_name: "test".to_string(),
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_noop_action() {
        let action = NoOpAction;
        assert!(action.run(&test_ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fn_action_failure() {
        let action = FnAction::new(|_ctx| anyhow::bail!("boom"));
        let err = action.run(&test_ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_shell_action_success() {
        let action = ShellAction::new("true");
        assert!(action.run(&test_ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_shell_action_nonzero_exit() {
        let action = ShellAction::new("exit 3");
        let err = action.run(&test_ctx()).await.unwrap_err();
        assert!(err.to_string().contains("status 3"));
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("freshness", Arc::new(NoOpAction))
            .with_retry_policy(RetryPolicy::new(3))
            .soft_fail();
        assert_eq!(task.name, "freshness");
        assert_eq!(task.retry_policy.max_attempts, 3);
        assert!(task.soft_fail);
    }

    #[test]
    fn test_shell_task_constructor() {
        let task = Task::shell("build", "dbt build");
        assert_eq!(task.name, "build");
        assert!(!task.soft_fail);
    }
}

//! The run executor: walks a graph, launches eligible tasks, applies retry,
//! and records terminal status.
//!
//! Independent tasks execute in parallel as soon as their upstreams are
//! satisfied. Retry delays suspend only the waiting task; siblings keep
//! making progress. Every state transition is appended to the run store
//! before it is emitted, and a downstream task is released only after its
//! upstream's terminal transition has been processed.


use crate::cancellation::CancellationToken;
use crate::core::{RunEvent, TaskStatus, TaskTransition};
use crate::errors::{ActionError, DagrunError};
use crate::events::EventSink;
use crate::run::{Run, RunRecord};
use crate::store::RunStore;
use crate::task::{ActionContext, Task};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tunables for a single run's execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Abort the whole run on the first non-soft terminal failure instead
    /// of skipping only the failed task's dependents.
    pub fail_fast: bool,
    /// Optional bound on concurrently running tasks. `None` means bounded
    /// only by graph readiness.
    pub max_parallel: Option<usize>,
}

impl ExecutorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables fail-fast aborts.
    #[must_use]
    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    /// Bounds task fan-out.
    #[must_use]
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max.max(1));
        self
    }
}

/// Terminal result of one task worker.
#[derive(Debug)]
struct TaskFinish {
    name: String,
    status: TaskStatus,
    attempts: u32,
    last_error: Option<String>,
    ended_at: DateTime<Utc>,
}

/// Executes runs against a store and an event sink.
pub struct Executor {
    config: ExecutorConfig,
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
}

impl Executor {
    /// Creates an executor with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config: ExecutorConfig::default(),
            store,
            sink,
        }
    }

    /// Sets the executor configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Advances the run until every task is terminal, then records and
    /// returns its outcome.
    ///
    /// `cancel` is the run's abort signal: cancelling it moves pending
    /// tasks to `Aborted` and asks in-flight actions to stop cooperatively.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph fails validation, a worker panics, or
    /// the store rejects a write of the run record.
    pub async fn execute(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> Result<RunRecord, DagrunError> {
        let order = run.graph.validate()?;

        // Make the run visible to point lookups before observers hear
        // about it; store writes precede emits for run-level events too.
        self.store.save_record(&run.to_record()).await?;
        self.sink
            .emit(&RunEvent::started(run.id, run.graph.name()))
            .await;

        let mut scheduled: HashSet<String> = HashSet::new();
        let mut ready: VecDeque<String> = VecDeque::new();
        let mut active: FuturesUnordered<tokio::task::JoinHandle<TaskFinish>> =
            FuturesUnordered::new();

        self.schedule_pass(run, &order, &mut scheduled, &mut ready)
            .await?;

        loop {
            if run.is_complete() {
                break;
            }

            if cancel.is_cancelled() {
                self.abort_pending(run, &mut scheduled, &mut ready).await?;
                if active.is_empty() {
                    break;
                }
            }

            let capacity = self.config.max_parallel.unwrap_or(usize::MAX);
            while active.len() < capacity {
                let Some(name) = ready.pop_front() else { break };
                let Some(task) = run.graph.task(&name).cloned() else {
                    continue;
                };
                if let Some(state) = run.task_states.get_mut(&name) {
                    state.status = TaskStatus::Running;
                    state.started_at = Some(Utc::now());
                }
                debug!(run_id = %run.id, task = %name, "launching task");
                active.push(tokio::spawn(run_task(
                    run.id,
                    task,
                    self.store.clone(),
                    self.sink.clone(),
                    cancel.clone(),
                )));
            }

            if active.is_empty() {
                if run.is_complete() {
                    break;
                }
                let stuck: Vec<&String> = run
                    .task_states
                    .iter()
                    .filter(|(_, s)| !s.status.is_terminal())
                    .map(|(name, _)| name)
                    .collect();
                return Err(DagrunError::Internal(format!(
                    "deadlocked run; remaining tasks: {stuck:?}"
                )));
            }

            match active.next().await {
                Some(Ok(finish)) => {
                    self.apply_finish(run, &finish);

                    let hard_failure = finish.status == TaskStatus::Failed
                        && !run.graph.task(&finish.name).is_some_and(|t| t.soft_fail);
                    if hard_failure && self.config.fail_fast && !cancel.is_cancelled() {
                        cancel.cancel(format!("fail-fast: task '{}' failed", finish.name));
                    }

                    if !cancel.is_cancelled() {
                        self.schedule_pass(run, &order, &mut scheduled, &mut ready)
                            .await?;
                    }
                }
                Some(Err(join_err)) => {
                    return Err(DagrunError::Internal(format!(
                        "task join error: {join_err}"
                    )));
                }
                None => {}
            }
        }

        let outcome = run.compute_outcome();
        run.finish(outcome);
        let record = run.to_record();
        self.store.save_record(&record).await?;
        self.sink.emit(&RunEvent::finished(run.id, outcome)).await;

        Ok(record)
    }

    /// Copies a worker's terminal result into the run's state table.
    fn apply_finish(&self, run: &mut Run, finish: &TaskFinish) {
        if let Some(state) = run.task_states.get_mut(&finish.name) {
            state.status = finish.status;
            state.attempt_count = finish.attempts;
            state.last_error = finish.last_error.clone();
            state.ended_at = Some(finish.ended_at);
        }
    }

    /// Releases tasks whose upstreams are satisfied and skips tasks behind
    /// a blocking upstream.
    ///
    /// `order` is topological, so skips cascade in a single pass: a task
    /// skipped early in the walk blocks its dependents later in the same
    /// walk.
    async fn schedule_pass(
        &self,
        run: &mut Run,
        order: &[String],
        scheduled: &mut HashSet<String>,
        ready: &mut VecDeque<String>,
    ) -> Result<(), DagrunError> {
        for name in order {
            let Some(state) = run.task_states.get(name) else {
                continue;
            };
            if state.status != TaskStatus::Pending || scheduled.contains(name) {
                continue;
            }

            let Some(upstreams) = run.graph.upstream_of(name) else {
                continue;
            };

            let mut blocked = false;
            let mut satisfied = true;
            for upstream in upstreams {
                let soft = run.graph.task(upstream).is_some_and(|t| t.soft_fail);
                let status = run
                    .task_states
                    .get(upstream)
                    .map_or(TaskStatus::Pending, |s| s.status);
                if status.blocks_downstream(soft) {
                    blocked = true;
                    break;
                }
                if !status.satisfies_downstream(soft) {
                    satisfied = false;
                }
            }

            if blocked {
                self.mark_unrun(run, name, TaskStatus::Skipped).await?;
            } else if satisfied {
                scheduled.insert(name.clone());
                ready.push_back(name.clone());
            }
        }
        Ok(())
    }

    /// Aborts every task that has not been handed to a worker yet.
    async fn abort_pending(
        &self,
        run: &mut Run,
        scheduled: &mut HashSet<String>,
        ready: &mut VecDeque<String>,
    ) -> Result<(), DagrunError> {
        while let Some(name) = ready.pop_front() {
            scheduled.remove(&name);
            self.mark_unrun(run, &name, TaskStatus::Aborted).await?;
        }
        let pending: Vec<String> = run
            .task_states
            .iter()
            .filter(|(name, s)| s.status == TaskStatus::Pending && !scheduled.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in pending {
            self.mark_unrun(run, &name, TaskStatus::Aborted).await?;
        }
        Ok(())
    }

    /// Moves a task that never ran from `Pending` straight to a terminal
    /// state, recording the transition.
    async fn mark_unrun(
        &self,
        run: &mut Run,
        name: &str,
        status: TaskStatus,
    ) -> Result<(), DagrunError> {
        let now = Utc::now();
        if let Some(state) = run.task_states.get_mut(name) {
            state.status = status;
            state.ended_at = Some(now);
        }
        let transition = TaskTransition::new(run.id, name, TaskStatus::Pending, status, 0);
        self.store.append_transition(&transition).await?;
        self.sink.emit(&transition.into()).await;
        Ok(())
    }
}

/// Runs one task to a terminal state, including its retry loop.
///
/// The retry sleep and the action itself both race the cancellation token,
/// so an abort is observed at the next suspension point.
async fn run_task(
    run_id: uuid::Uuid,
    task: Task,
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> TaskFinish {
    let mut attempt: u32 = 0;
    let mut prev = TaskStatus::Pending;
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            record(&store, &sink, TaskTransition::new(run_id, &task.name, prev, TaskStatus::Aborted, attempt)).await;
            return finish(&task, TaskStatus::Aborted, attempt, last_error);
        }

        attempt += 1;
        record(
            &store,
            &sink,
            TaskTransition::new(run_id, &task.name, prev, TaskStatus::Running, attempt),
        )
        .await;
        prev = TaskStatus::Running;

        let ctx = ActionContext {
            run_id,
            task_name: task.name.clone(),
            attempt,
            cancel: cancel.clone(),
        };

        let result = tokio::select! {
            res = task.action.run(&ctx) => Some(res),
            () = cancel.cancelled() => None,
        };

        match result {
            None => {
                record(
                    &store,
                    &sink,
                    TaskTransition::new(run_id, &task.name, prev, TaskStatus::Aborted, attempt),
                )
                .await;
                return finish(&task, TaskStatus::Aborted, attempt, last_error);
            }
            Some(Ok(())) => {
                record(
                    &store,
                    &sink,
                    TaskTransition::new(run_id, &task.name, prev, TaskStatus::Succeeded, attempt),
                )
                .await;
                return finish(&task, TaskStatus::Succeeded, attempt, None);
            }
            Some(Err(err)) => {
                let action_err = ActionError::from(err);
                last_error = Some(action_err.message.clone());

                if task.retry_policy.allows_retry(attempt) {
                    record(
                        &store,
                        &sink,
                        TaskTransition::new(
                            run_id,
                            &task.name,
                            prev,
                            TaskStatus::Retrying,
                            attempt,
                        )
                        .with_error(&action_err.message),
                    )
                    .await;
                    prev = TaskStatus::Retrying;

                    let delay = task.retry_policy.delay_for(attempt);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            record(
                                &store,
                                &sink,
                                TaskTransition::new(run_id, &task.name, prev, TaskStatus::Aborted, attempt),
                            )
                            .await;
                            return finish(&task, TaskStatus::Aborted, attempt, last_error);
                        }
                    }
                } else {
                    record(
                        &store,
                        &sink,
                        TaskTransition::new(run_id, &task.name, prev, TaskStatus::Failed, attempt)
                            .with_error(&action_err.message),
                    )
                    .await;
                    return finish(&task, TaskStatus::Failed, attempt, last_error);
                }
            }
        }
    }
}

/// Appends a transition to the store, then emits it.
///
/// Store append comes first so observers never see a transition that was
/// not durably recorded. A store failure is logged, not fatal: history may
/// lose an entry but the run itself must not.
async fn record(store: &Arc<dyn RunStore>, sink: &Arc<dyn EventSink>, transition: TaskTransition) {
    if let Err(err) = store.append_transition(&transition).await {
        warn!(
            task = %transition.task,
            run_id = %transition.run_id,
            error = %err,
            "failed to append transition to run store"
        );
    }
    sink.emit(&transition.into()).await;
}

fn finish(
    task: &Task,
    status: TaskStatus,
    attempts: u32,
    last_error: Option<String>,
) -> TaskFinish {
    TaskFinish {
        name: task.name.clone(),
        status,
        attempts,
        last_error,
        ended_at: Utc::now(),
    }
}

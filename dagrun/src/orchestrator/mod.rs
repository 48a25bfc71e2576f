//! The orchestrator: a long-running loop that drives a trigger and hands
//! admitted runs to the executor.
//!
//! Each admitted run executes on its own spawned task with its own
//! cancellation token, so one pipeline's runs can be aborted individually
//! while the loop keeps ticking. Shutdown cancels every in-flight run and
//! waits for the workers to drain.

use crate::cancellation::CancellationToken;
use crate::core::RunOutcome;
use crate::errors::{DagrunError, RunAbortedError};
use crate::executor::Executor;
use crate::run::{Run, RunRecord};
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default spacing between schedule evaluations.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Drives one pipeline: evaluates its trigger on a timer and executes
/// whatever runs are admitted.
pub struct Orchestrator {
    trigger: Arc<Trigger>,
    executor: Arc<Executor>,
    tick_interval: Duration,
    shutdown: CancellationToken,
    active: Arc<DashMap<Uuid, CancellationToken>>,
}

impl Orchestrator {
    /// Creates an orchestrator over a trigger and an executor.
    #[must_use]
    pub fn new(trigger: Arc<Trigger>, executor: Arc<Executor>) -> Self {
        Self {
            trigger,
            executor,
            tick_interval: DEFAULT_TICK_INTERVAL,
            shutdown: CancellationToken::new(),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Sets the spacing between schedule evaluations.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Returns the number of runs currently executing.
    #[must_use]
    pub fn active_run_count(&self) -> usize {
        self.active.len()
    }

    /// Returns the IDs of runs currently executing.
    #[must_use]
    pub fn active_run_ids(&self) -> Vec<Uuid> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Evaluates the schedule at `now` and spawns every admitted run.
    ///
    /// Returns the IDs of the runs started this tick.
    pub fn poll_once(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let report = self.trigger.tick(now);
        for deferral in &report.deferred {
            debug!(
                pipeline = %self.trigger.graph().name(),
                slot = %deferral.fire_time,
                reason = ?deferral.reason,
                "deferred scheduled run"
            );
        }
        report
            .admitted
            .into_iter()
            .map(|run| self.spawn_run(run))
            .collect()
    }

    /// Starts a manual run in the background.
    ///
    /// # Errors
    ///
    /// Returns an admission error when the trigger's concurrency limit is
    /// reached.
    pub fn run_now(&self) -> Result<Uuid, DagrunError> {
        let run = self.trigger.manual_trigger()?;
        Ok(self.spawn_run(run))
    }

    /// Starts a manual run and waits for its outcome.
    ///
    /// The record is persisted to the store in every case; an aborted run
    /// additionally surfaces as [`RunAbortedError`] so callers waiting on a
    /// result see the interruption.
    ///
    /// # Errors
    ///
    /// Returns an admission error when the concurrency limit is reached, an
    /// abort error when the run was cancelled, or the executor's error when
    /// execution itself failed.
    pub async fn run_now_and_wait(&self) -> Result<RunRecord, DagrunError> {
        let mut run = self.trigger.manual_trigger()?;
        let run_id = run.id;
        let token = CancellationToken::new();
        self.active.insert(run_id, token.clone());

        let result = self.executor.execute(&mut run, &token).await;
        self.active.remove(&run_id);

        match result {
            Ok(record) => {
                let outcome = record.outcome.unwrap_or(RunOutcome::Aborted);
                self.trigger.run_finished(outcome, false);
                if outcome == RunOutcome::Aborted {
                    let reason = token
                        .reason()
                        .unwrap_or_else(|| "cancelled".to_string());
                    return Err(RunAbortedError::new(run_id, reason).into());
                }
                Ok(record)
            }
            Err(err) => {
                self.trigger.run_finished(RunOutcome::Failed, false);
                Err(err)
            }
        }
    }

    /// Requests cancellation of one active run.
    ///
    /// Returns true if the run was active and has been signalled.
    pub fn abort_run(&self, run_id: Uuid, reason: impl Into<String>) -> bool {
        match self.active.get(&run_id) {
            Some(token) => {
                token.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Requests shutdown of the orchestrator loop.
    pub fn shutdown(&self, reason: impl Into<String>) {
        self.shutdown.cancel(reason);
    }

    /// Runs the tick loop until shutdown, then drains in-flight runs.
    pub async fn run(&self) {
        info!(
            pipeline = %self.trigger.graph().name(),
            tick_interval = ?self.tick_interval,
            "orchestrator started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once(Utc::now());
                }
                () = self.shutdown.cancelled() => break,
            }
        }

        let reason = self
            .shutdown
            .reason()
            .unwrap_or_else(|| "shutdown".to_string());
        for entry in self.active.iter() {
            entry.value().cancel(reason.clone());
        }
        while !self.active.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        info!(pipeline = %self.trigger.graph().name(), "orchestrator stopped");
    }

    /// Spawns a run on its own task with its own cancellation token.
    fn spawn_run(&self, run: Run) -> Uuid {
        let run_id = run.id;
        let token = CancellationToken::new();
        self.active.insert(run_id, token.clone());

        let trigger = self.trigger.clone();
        let executor = self.executor.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            let mut run = run;
            let scheduled = run.is_scheduled();
            match executor.execute(&mut run, &token).await {
                Ok(record) => {
                    trigger.run_finished(record.outcome.unwrap_or(RunOutcome::Aborted), scheduled);
                }
                Err(err) => {
                    error!(run_id = %run_id, error = %err, "run execution failed");
                    trigger.run_finished(RunOutcome::Failed, scheduled);
                }
            }
            active.remove(&run_id);
        });

        run_id
    }
}

//! Event sinks for run observability.
//!
//! The executor emits a [`RunEvent`] for every state transition; sinks fan
//! them out to logging, monitoring, or test collectors. A sink must never
//! fail the pipeline: `try_emit` is infallible by contract.

use crate::core::RunEvent;
use async_trait::async_trait;
use tracing::{info, warn};

/// Trait for consumers of run events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &RunEvent);

    /// Emits an event without blocking. Errors are swallowed.
    fn try_emit(&self, event: &RunEvent);
}

/// A sink that discards all events. The default when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &RunEvent) {}

    fn try_emit(&self, _event: &RunEvent) {}
}

/// A sink that logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    /// Creates a new logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn log(event: &RunEvent) {
        match event {
            RunEvent::RunStarted {
                run_id, pipeline, ..
            } => {
                info!(run_id = %run_id, pipeline = %pipeline, "run started");
            }
            RunEvent::TaskTransition(t) => {
                if let Some(error) = &t.error {
                    warn!(
                        run_id = %t.run_id,
                        task = %t.task,
                        from = %t.from,
                        to = %t.to,
                        attempt = t.attempt,
                        error = %error,
                        "task transition"
                    );
                } else {
                    info!(
                        run_id = %t.run_id,
                        task = %t.task,
                        from = %t.from,
                        to = %t.to,
                        attempt = t.attempt,
                        "task transition"
                    );
                }
            }
            RunEvent::RunFinished {
                run_id, outcome, ..
            } => {
                info!(run_id = %run_id, outcome = %outcome, "run finished");
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &RunEvent) {
        Self::log(event);
    }

    fn try_emit(&self, event: &RunEvent) {
        Self::log(event);
    }
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns the transitions recorded for one task, in emission order.
    #[must_use]
    pub fn transitions_for(&self, task: &str) -> Vec<crate::core::TaskTransition> {
        self.events
            .read()
            .iter()
            .filter_map(RunEvent::as_transition)
            .filter(|t| t.task == task)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunOutcome, TaskStatus, TaskTransition};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit(&RunEvent::started(Uuid::new_v4(), "nightly")).await;
        sink.try_emit(&RunEvent::finished(Uuid::new_v4(), RunOutcome::Success));
    }

    #[tokio::test]
    async fn test_logging_sink_does_not_panic() {
        let sink = LoggingEventSink::new();
        let transition = TaskTransition::new(
            Uuid::new_v4(),
            "build",
            TaskStatus::Running,
            TaskStatus::Retrying,
            1,
        )
        .with_error("boom");
        sink.emit(&transition.into()).await;
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        let run_id = Uuid::new_v4();
        sink.emit(&RunEvent::started(run_id, "nightly")).await;
        sink.try_emit(
            &TaskTransition::new(run_id, "seed", TaskStatus::Pending, TaskStatus::Running, 1)
                .into(),
        );

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.transitions_for("seed").len(), 1);
        assert!(sink.transitions_for("build").is_empty());

        sink.clear();
        assert!(sink.is_empty());
    }
}

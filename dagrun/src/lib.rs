//! # Dagrun
//!
//! A small engine for scheduled, dependency-ordered task execution.
//!
//! Dagrun models a pipeline as a directed acyclic graph of named tasks and
//! provides:
//!
//! - **Graph construction**: duplicate, unknown-task, and cycle errors are
//!   caught at build time, before anything runs
//! - **Dependency-ordered execution**: independent tasks run concurrently;
//!   a task starts only once every upstream is satisfied
//! - **Per-task retry**: configurable attempts, backoff, and jitter
//! - **Failure tolerance**: a `soft_fail` task may fail without blocking
//!   its dependents or the run outcome
//! - **Scheduling**: interval and daily triggers with concurrency limits,
//!   optional catchup, and past-outcome gating
//! - **Observability**: every state transition is persisted and emitted as
//!   an event
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagrun::prelude::*;
//!
//! let graph = TaskGraph::chain("nightly", [
//!     Task::shell("deps", "dbt deps"),
//!     Task::shell("build", "dbt build"),
//!     Task::shell("test", "dbt test"),
//! ])?;
//!
//! let store = Arc::new(InMemoryRunStore::new());
//! let executor = Executor::new(store, Arc::new(LoggingEventSink::new()));
//! let mut run = Run::new(Arc::new(graph));
//! let record = executor.execute(&mut run, &CancellationToken::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod observability;
pub mod orchestrator;
pub mod run;
pub mod store;
pub mod task;
pub mod testing;
pub mod trigger;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{RunEvent, RunOutcome, TaskStatus, TaskTransition};
    pub use crate::errors::{
        ActionError, AdmissionRefusedError, CycleError, DagrunError,
        DuplicateTaskError, RunAbortedError, UnknownTaskError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::executor::{Executor, ExecutorConfig};
    pub use crate::graph::TaskGraph;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::run::{Run, RunRecord, TaskState};
    pub use crate::store::{InMemoryRunStore, RunStore};
    pub use crate::task::{
        Action, ActionContext, BackoffStrategy, FnAction, JitterStrategy,
        NoOpAction, RetryPolicy, ShellAction, Task,
    };
    pub use crate::trigger::{
        DeferReason, Deferral, Schedule, TickReport, Trigger, TriggerConfig,
    };
}

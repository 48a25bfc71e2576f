//! Core types shared across the scheduling core.

mod event;
mod status;

pub use event::{RunEvent, TaskTransition};
pub use status::{RunOutcome, TaskStatus};

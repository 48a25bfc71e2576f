//! Deterministic actions and policy shortcuts for exercising the executor.
//!
//! These are exported so downstream crates can drive the executor through
//! scripted success, failure, and slow-task scenarios without shelling out.

use crate::task::{Action, ActionContext, RetryPolicy};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An action that fails a fixed number of times, then succeeds.
#[derive(Debug, Default)]
pub struct FlakyAction {
    fail_times: u32,
    calls: AtomicU32,
}

impl FlakyAction {
    /// Fails the first `fail_times` attempts.
    #[must_use]
    pub fn failing_times(fail_times: u32) -> Self {
        Self {
            fail_times,
            calls: AtomicU32::new(0),
        }
    }

    /// Returns how many attempts have been made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for FlakyAction {
    async fn run(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            anyhow::bail!("transient failure on attempt {call}");
        }
        Ok(())
    }
}

/// An action that fails every attempt with a fixed message.
#[derive(Debug, Clone)]
pub struct AlwaysFailsAction {
    message: String,
}

impl AlwaysFailsAction {
    /// Creates an action failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for AlwaysFailsAction {
    fn default() -> Self {
        Self::new("always fails")
    }
}

#[async_trait]
impl Action for AlwaysFailsAction {
    async fn run(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.message)
    }
}

/// An action that succeeds and counts its invocations on a shared counter.
#[derive(Debug, Default)]
pub struct CountingAction {
    calls: Arc<AtomicU32>,
}

impl CountingAction {
    /// Creates a counting action over a shared counter.
    #[must_use]
    pub fn new(calls: Arc<AtomicU32>) -> Self {
        Self { calls }
    }

    /// Returns the number of successful invocations.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for CountingAction {
    async fn run(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An action that sleeps for a fixed duration, then succeeds.
///
/// It does not watch the cancellation token itself; the executor's attempt
/// race is what ends it early on abort.
#[derive(Debug, Clone)]
pub struct SleepingAction {
    duration: Duration,
}

impl SleepingAction {
    /// Sleeps for `duration` on every attempt.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Action for SleepingAction {
    async fn run(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// An action that tracks the peak number of concurrent invocations.
///
/// Holds each invocation open briefly so overlap is observable.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicU32>,
    peak: Arc<AtomicU32>,
}

impl ConcurrencyProbe {
    /// Creates a probe sharing state with `other`, so several tasks can feed
    /// one peak counter.
    #[must_use]
    pub fn shared_with(&self) -> Self {
        Self {
            current: self.current.clone(),
            peak: self.peak.clone(),
        }
    }

    /// Returns the highest observed concurrency.
    #[must_use]
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for ConcurrencyProbe {
    async fn run(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A retry policy with millisecond delays, sized for tests.
#[must_use]
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts).with_base_delay_ms(1)
}

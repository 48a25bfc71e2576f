//! Scheduled and manual run admission.
//!
//! A [`Trigger`] owns the admission policy for one graph: when the schedule
//! fires, whether a new run may start while others are active, and whether a
//! scheduled run may start after a failed predecessor. Slots that cannot be
//! admitted are deferred, never queued: a deferred slot is re-offered on the
//! next tick, and with catchup disabled a newer due slot supersedes it.

use crate::core::RunOutcome;
use crate::errors::AdmissionRefusedError;
use crate::graph::TaskGraph;
use crate::run::Run;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Hard cap on slots materialized in one catchup window.
const MAX_CATCHUP_SLOTS: usize = 10_000;

/// When a graph's runs fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Fires at fixed multiples of `interval` from the Unix epoch.
    Interval(Duration),
    /// Fires once a day at the given UTC wall-clock time.
    Daily {
        /// Hour of day, 0-23.
        hour: u8,
        /// Minute of hour, 0-59.
        minute: u8,
    },
}

impl Schedule {
    /// A daily schedule at `hour:minute` UTC. Out-of-range values are
    /// clamped.
    #[must_use]
    pub fn daily(hour: u8, minute: u8) -> Self {
        Self::Daily {
            hour: hour.min(23),
            minute: minute.min(59),
        }
    }

    /// An interval schedule. Sub-millisecond intervals round up to 1ms.
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self::Interval(interval.max(Duration::from_millis(1)))
    }

    fn interval_ms(interval: Duration) -> i64 {
        i64::try_from(interval.as_millis())
            .unwrap_or(i64::MAX)
            .max(1)
    }

    fn daily_at(date: NaiveDate, hour: u8, minute: u8) -> DateTime<Utc> {
        date.and_hms_opt(u32::from(hour.min(23)), u32::from(minute.min(59)), 0)
            .unwrap_or_default()
            .and_utc()
    }

    /// Returns the first fire time strictly after `after`.
    #[must_use]
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Interval(interval) => {
                let period = Self::interval_ms(interval);
                let next = (after.timestamp_millis().div_euclid(period) + 1) * period;
                DateTime::from_timestamp_millis(next)
                    .unwrap_or_else(|| after + ChronoDuration::milliseconds(period))
            }
            Self::Daily { hour, minute } => {
                let today = Self::daily_at(after.date_naive(), hour, minute);
                if today > after {
                    today
                } else {
                    Self::daily_at(after.date_naive() + ChronoDuration::days(1), hour, minute)
                }
            }
        }
    }

    /// Returns the most recent fire time at or before `now`, if one exists.
    #[must_use]
    pub fn prev_fire_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::Interval(interval) => {
                let period = Self::interval_ms(interval);
                let prev = now.timestamp_millis().div_euclid(period) * period;
                DateTime::from_timestamp_millis(prev)
            }
            Self::Daily { hour, minute } => {
                let today = Self::daily_at(now.date_naive(), hour, minute);
                if today <= now {
                    Some(today)
                } else {
                    Some(Self::daily_at(
                        now.date_naive() - ChronoDuration::days(1),
                        hour,
                        minute,
                    ))
                }
            }
        }
    }

    /// Returns every fire time in `(after, until]`, oldest first, capped at
    /// [`MAX_CATCHUP_SLOTS`].
    #[must_use]
    pub fn fire_times_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let mut times = Vec::new();
        let mut cursor = after;
        while times.len() < MAX_CATCHUP_SLOTS {
            let next = self.next_fire_after(cursor);
            if next > until || next <= cursor {
                break;
            }
            times.push(next);
            cursor = next;
        }
        times
    }
}

/// Admission policy for one graph's runs.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// When scheduled runs fire.
    pub schedule: Schedule,
    /// Maximum simultaneously active runs, scheduled and manual combined.
    pub concurrency_limit: usize,
    /// If true, every missed slot is materialized on the next tick; if
    /// false, only the latest due slot fires.
    pub catchup: bool,
    /// If true, a scheduled run is admitted only when the previous
    /// scheduled run succeeded.
    pub depends_on_past: bool,
}

impl TriggerConfig {
    /// Creates a config with the defaults: one active run, no catchup, no
    /// dependence on past outcomes.
    #[must_use]
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            concurrency_limit: 1,
            catchup: false,
            depends_on_past: false,
        }
    }

    /// Sets the active-run limit. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Enables catchup of missed slots.
    #[must_use]
    pub fn with_catchup(mut self) -> Self {
        self.catchup = true;
        self
    }

    /// Requires the previous scheduled run to have succeeded.
    #[must_use]
    pub fn with_depends_on_past(mut self) -> Self {
        self.depends_on_past = true;
        self
    }
}

/// Why a due slot was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The active-run limit was reached.
    ConcurrencyLimit,
    /// The previous scheduled run did not succeed.
    DependsOnPast,
}

/// A due slot the trigger declined to admit this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deferral {
    /// The schedule slot that was due.
    pub fire_time: DateTime<Utc>,
    /// Why it was deferred.
    pub reason: DeferReason,
}

/// The outcome of one trigger tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Runs admitted this tick, oldest slot first.
    pub admitted: Vec<Run>,
    /// Slots that were due but deferred.
    pub deferred: Vec<Deferral>,
}

#[derive(Debug, Default)]
struct TriggerState {
    /// High-water mark of admitted schedule slots.
    last_admitted_slot: Option<DateTime<Utc>>,
    active_runs: usize,
    /// Outcome of the most recently finished scheduled run. Manual runs
    /// never update this: the depends-on-past gate reads schedule history
    /// only.
    last_scheduled_outcome: Option<RunOutcome>,
}

/// Admits runs for one graph according to its [`TriggerConfig`].
#[derive(Debug)]
pub struct Trigger {
    graph: Arc<TaskGraph>,
    config: TriggerConfig,
    state: Mutex<TriggerState>,
}

impl Trigger {
    /// Creates a trigger for a graph.
    #[must_use]
    pub fn new(graph: Arc<TaskGraph>, config: TriggerConfig) -> Self {
        Self {
            graph,
            config,
            state: Mutex::new(TriggerState::default()),
        }
    }

    /// Returns the graph this trigger admits runs for.
    #[must_use]
    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    /// Returns the trigger's configuration.
    #[must_use]
    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Returns the number of currently active runs.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.state.lock().active_runs
    }

    /// Evaluates the schedule at `now` and admits whatever slots the policy
    /// allows.
    ///
    /// Deferred slots are not queued; they become due again on the next
    /// tick. With catchup disabled, a newer due slot supersedes older ones.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut state = self.state.lock();
        let mut report = TickReport::default();

        let due = self.due_slots(&state, now);

        for slot in due {
            if self.config.depends_on_past
                && state
                    .last_scheduled_outcome
                    .is_some_and(|outcome| !outcome.is_success())
            {
                report.deferred.push(Deferral {
                    fire_time: slot,
                    reason: DeferReason::DependsOnPast,
                });
                continue;
            }
            if state.active_runs >= self.config.concurrency_limit {
                report.deferred.push(Deferral {
                    fire_time: slot,
                    reason: DeferReason::ConcurrencyLimit,
                });
                continue;
            }

            debug!(pipeline = %self.graph.name(), slot = %slot, "admitting scheduled run");
            state.active_runs += 1;
            state.last_admitted_slot = Some(slot);
            report.admitted.push(Run::scheduled(self.graph.clone(), slot));
        }

        report
    }

    /// Admits a run outside the schedule.
    ///
    /// Manual runs count toward the concurrency limit like scheduled ones,
    /// but they are not slots: deferral does not apply, so a refused request
    /// is an error the caller must retry.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionRefusedError` when the active-run limit is reached.
    pub fn manual_trigger(&self) -> Result<Run, AdmissionRefusedError> {
        let mut state = self.state.lock();
        if state.active_runs >= self.config.concurrency_limit {
            return Err(AdmissionRefusedError::new(format!(
                "concurrency limit {} reached for pipeline '{}'",
                self.config.concurrency_limit,
                self.graph.name()
            )));
        }
        state.active_runs += 1;
        Ok(Run::new(self.graph.clone()))
    }

    /// Records that a previously admitted run reached its outcome.
    ///
    /// `scheduled` must reflect how the run was admitted (see
    /// [`Run::is_scheduled`]): only scheduled outcomes feed the
    /// depends-on-past gate, so a manual run cannot stand in for a failed
    /// scheduled predecessor.
    pub fn run_finished(&self, outcome: RunOutcome, scheduled: bool) {
        let mut state = self.state.lock();
        state.active_runs = state.active_runs.saturating_sub(1);
        if scheduled {
            state.last_scheduled_outcome = Some(outcome);
        }
    }

    /// Computes the slots due at `now`, honoring catchup.
    fn due_slots(&self, state: &TriggerState, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let due = match state.last_admitted_slot {
            Some(mark) => self.config.schedule.fire_times_between(mark, now),
            // Before the first admission only the latest elapsed slot is
            // due; earlier history is never backfilled.
            None => self
                .config
                .schedule
                .prev_fire_at(now)
                .into_iter()
                .collect(),
        };

        if self.config.catchup || due.len() <= 1 {
            due
        } else {
            due.last().copied().into_iter().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStatus;
    use crate::task::{NoOpAction, Task};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn graph() -> Arc<TaskGraph> {
        let mut graph = TaskGraph::new("nightly");
        graph
            .add_task(Task::new("build", Arc::new(NoOpAction)))
            .unwrap();
        Arc::new(graph)
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 30, h, m, 0).unwrap()
    }

    #[test]
    fn test_daily_next_fire() {
        let schedule = Schedule::daily(6, 0);
        assert_eq!(schedule.next_fire_after(at(5, 0)), at(6, 0));
        // At or past the mark rolls to the next day.
        let next = schedule.next_fire_after(at(6, 0));
        assert_eq!(next, at(6, 0) + ChronoDuration::days(1));
    }

    #[test]
    fn test_daily_prev_fire() {
        let schedule = Schedule::daily(6, 0);
        assert_eq!(schedule.prev_fire_at(at(7, 0)), Some(at(6, 0)));
        assert_eq!(
            schedule.prev_fire_at(at(5, 0)),
            Some(at(6, 0) - ChronoDuration::days(1))
        );
    }

    #[test]
    fn test_interval_fires_on_epoch_multiples() {
        let schedule = Schedule::every(Duration::from_secs(3600));
        let next = schedule.next_fire_after(at(5, 30));
        assert_eq!(next, at(6, 0));
    }

    #[test]
    fn test_fire_times_between() {
        let schedule = Schedule::every(Duration::from_secs(3600));
        let times = schedule.fire_times_between(at(5, 0), at(8, 0));
        assert_eq!(times, vec![at(6, 0), at(7, 0), at(8, 0)]);
    }

    #[test]
    fn test_first_tick_admits_latest_elapsed_slot() {
        let trigger = Trigger::new(graph(), TriggerConfig::new(Schedule::daily(6, 0)));
        let report = trigger.tick(at(7, 0));

        assert_eq!(report.admitted.len(), 1);
        assert_eq!(report.admitted[0].scheduled_for, Some(at(6, 0)));
        assert!(report.deferred.is_empty());
    }

    #[test]
    fn test_no_catchup_takes_only_latest_slot() {
        let schedule = Schedule::every(Duration::from_secs(3600));
        let trigger = Trigger::new(
            graph(),
            TriggerConfig::new(schedule).with_concurrency_limit(10),
        );

        // Admit one slot, then let three elapse.
        let first = trigger.tick(at(5, 0));
        assert_eq!(first.admitted.len(), 1);

        let report = trigger.tick(at(8, 30));
        assert_eq!(report.admitted.len(), 1);
        assert_eq!(report.admitted[0].scheduled_for, Some(at(8, 0)));
    }

    #[test]
    fn test_catchup_materializes_every_missed_slot() {
        let schedule = Schedule::every(Duration::from_secs(3600));
        let trigger = Trigger::new(
            graph(),
            TriggerConfig::new(schedule)
                .with_catchup()
                .with_concurrency_limit(10),
        );

        trigger.tick(at(5, 0));
        let report = trigger.tick(at(8, 30));

        let slots: Vec<_> = report
            .admitted
            .iter()
            .filter_map(|run| run.scheduled_for)
            .collect();
        assert_eq!(slots, vec![at(6, 0), at(7, 0), at(8, 0)]);
    }

    #[test]
    fn test_concurrency_limit_defers_slot() {
        let trigger = Trigger::new(graph(), TriggerConfig::new(Schedule::daily(6, 0)));

        let first = trigger.tick(at(6, 30));
        assert_eq!(first.admitted.len(), 1);

        // Next day's slot is due but the first run is still active.
        let second = trigger.tick(at(6, 30) + ChronoDuration::days(1));
        assert!(second.admitted.is_empty());
        assert_eq!(second.deferred.len(), 1);
        assert_eq!(second.deferred[0].reason, DeferReason::ConcurrencyLimit);

        // Once the run finishes, the deferred slot is re-offered.
        trigger.run_finished(RunOutcome::Success, true);
        let third = trigger.tick(at(6, 31) + ChronoDuration::days(1));
        assert_eq!(third.admitted.len(), 1);
        assert_eq!(
            third.admitted[0].scheduled_for,
            Some(at(6, 0) + ChronoDuration::days(1))
        );
    }

    #[test]
    fn test_depends_on_past_defers_after_scheduled_failure() {
        let trigger = Trigger::new(
            graph(),
            TriggerConfig::new(Schedule::daily(6, 0)).with_depends_on_past(),
        );

        let first = trigger.tick(at(6, 30));
        assert_eq!(first.admitted.len(), 1);
        trigger.run_finished(RunOutcome::Failed, true);

        let second = trigger.tick(at(6, 30) + ChronoDuration::days(1));
        assert!(second.admitted.is_empty());
        assert_eq!(second.deferred[0].reason, DeferReason::DependsOnPast);
    }

    #[test]
    fn test_depends_on_past_admits_after_scheduled_success() {
        let trigger = Trigger::new(
            graph(),
            TriggerConfig::new(Schedule::daily(6, 0)).with_depends_on_past(),
        );

        let first = trigger.tick(at(6, 30));
        assert_eq!(first.admitted.len(), 1);
        trigger.run_finished(RunOutcome::Success, true);

        let second = trigger.tick(at(6, 30) + ChronoDuration::days(1));
        assert_eq!(second.admitted.len(), 1);
        assert!(second.deferred.is_empty());
    }

    #[test]
    fn test_depends_on_past_ignores_manual_outcomes() {
        let trigger = Trigger::new(
            graph(),
            TriggerConfig::new(Schedule::daily(6, 0)).with_depends_on_past(),
        );

        let first = trigger.tick(at(6, 30));
        assert_eq!(first.admitted.len(), 1);
        trigger.run_finished(RunOutcome::Failed, true);

        // A manual run succeeding is not scheduled history; the gate must
        // still see the failed scheduled predecessor.
        let run = trigger.manual_trigger().unwrap();
        assert!(!run.is_scheduled());
        assert_eq!(run.task_states["build"].status, TaskStatus::Pending);
        trigger.run_finished(RunOutcome::Success, false);

        let second = trigger.tick(at(6, 30) + ChronoDuration::days(1));
        assert!(second.admitted.is_empty());
        assert_eq!(second.deferred[0].reason, DeferReason::DependsOnPast);
    }

    #[test]
    fn test_manual_trigger_respects_limit() {
        let trigger = Trigger::new(graph(), TriggerConfig::new(Schedule::daily(6, 0)));

        let run = trigger.manual_trigger().unwrap();
        assert!(!run.is_scheduled());
        assert_eq!(trigger.active_runs(), 1);

        let err = trigger.manual_trigger().unwrap_err();
        assert!(err.reason.contains("concurrency limit"));

        trigger.run_finished(RunOutcome::Success, false);
        assert!(trigger.manual_trigger().is_ok());
    }

    #[test]
    fn test_tick_before_any_slot_admits_nothing_daily_future() {
        // 05:00 with a 06:00 schedule: yesterday's slot is the latest
        // elapsed one and is admitted once, then nothing until 06:00.
        let trigger = Trigger::new(graph(), TriggerConfig::new(Schedule::daily(6, 0)));
        let first = trigger.tick(at(5, 0));
        assert_eq!(first.admitted.len(), 1);
        trigger.run_finished(RunOutcome::Success, true);

        let second = trigger.tick(at(5, 30));
        assert!(second.admitted.is_empty());

        let third = trigger.tick(at(6, 0));
        assert_eq!(third.admitted.len(), 1);
        assert_eq!(third.admitted[0].scheduled_for, Some(at(6, 0)));
    }
}

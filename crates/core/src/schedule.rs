//! Scheduling strategies for deferred jobs.
//!
//! A job can be pushed into the future in two ways. The default defers its
//! ready-time score so a now-bounded range query skips it until the time
//! passes. The original mode instead parks the job in the literal `delayed`
//! state and records the delay, and announces every job that becomes
//! `inactive` on the per-type wake-up list.

use std::fmt::Debug;

use crate::job::JobState;

/// Scheduling fields a strategy may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Ready time in epoch milliseconds, 0 when immediately ready.
    pub timing: i64,
    /// Delay in milliseconds recorded by the delayed-state strategy.
    pub delay: i64,
    /// State the job should move to.
    pub state: JobState,
}

/// How a job is deferred to a later time.
pub trait SchedulingStrategy: Send + Sync + Debug {
    /// Whether this is the original delayed-state mode.
    fn is_original(&self) -> bool;

    /// Make the job eligible at `run_at_ms` (epoch milliseconds).
    fn run_at(&self, schedule: &mut Schedule, run_at_ms: i64, now_ms: i64);

    /// Make the job eligible `delay_ms` milliseconds after `now_ms`.
    fn delay(&self, schedule: &mut Schedule, delay_ms: i64, now_ms: i64);

    /// Whether entering `inactive` pushes a token to the wake-up list.
    fn signals_inactive(&self) -> bool;
}

/// Default strategy: defer through the ready-time score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreDeferral;

impl SchedulingStrategy for ScoreDeferral {
    fn is_original(&self) -> bool {
        false
    }

    fn run_at(&self, schedule: &mut Schedule, run_at_ms: i64, _now_ms: i64) {
        schedule.timing = run_at_ms;
        schedule.state = JobState::Inactive;
    }

    fn delay(&self, schedule: &mut Schedule, delay_ms: i64, now_ms: i64) {
        self.run_at(schedule, now_ms.saturating_add(delay_ms), now_ms);
    }

    fn signals_inactive(&self) -> bool {
        false
    }
}

/// Original strategy: park the job in the `delayed` state.
///
/// Nothing in this crate promotes delayed jobs; an external promoter that
/// understands the `delay` field is expected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayedState;

impl SchedulingStrategy for DelayedState {
    fn is_original(&self) -> bool {
        true
    }

    fn run_at(&self, schedule: &mut Schedule, run_at_ms: i64, now_ms: i64) {
        self.delay(schedule, run_at_ms.saturating_sub(now_ms), now_ms);
    }

    fn delay(&self, schedule: &mut Schedule, delay_ms: i64, _now_ms: i64) {
        schedule.delay = delay_ms.max(0);
        schedule.state = JobState::Delayed;
    }

    fn signals_inactive(&self) -> bool {
        true
    }
}

//! Per-operation circuit breaker state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether calls are currently let through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BreakerPhase {
    #[default]
    Closed,
    Open,
}

/// What the breaker allows for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Run normally with the full retry budget.
    Allowed,
    /// Cool-down elapsed: run exactly one trial attempt.
    Trial,
    /// Still cooling down: do not run at all.
    Rejected,
}

/// Breaker state for one operation id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub phase: BreakerPhase,
    /// Failed attempts since the last success.
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// While open, calls before this instant are rejected.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    pub fn is_open(&self) -> bool {
        self.phase == BreakerPhase::Open
    }

    pub(crate) fn admission(&self, now: DateTime<Utc>) -> Admission {
        match (self.phase, self.next_attempt_at) {
            (BreakerPhase::Closed, _) => Admission::Allowed,
            (BreakerPhase::Open, Some(at)) if now < at => Admission::Rejected,
            (BreakerPhase::Open, _) => Admission::Trial,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.phase = BreakerPhase::Closed;
        self.failures = 0;
        self.next_attempt_at = None;
    }

    pub(crate) fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
    }

    pub(crate) fn trip(&mut self, now: DateTime<Utc>, cool_down: chrono::TimeDelta) {
        self.phase = BreakerPhase::Open;
        self.next_attempt_at = Some(
            now.checked_add_signed(cool_down)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }
}

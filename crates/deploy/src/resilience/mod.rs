//! Resilient execution of single remote operations.
//!
//! [`ResilientExecutor`] wraps a fallible async operation with bounded retries,
//! a backoff schedule picked by [`OperationClass`], and a circuit breaker per
//! operation id. One executor is meant to be created per process and shared by
//! reference, so that every call with the same id sees the same breaker.
//!
//! ```text
//! closed --(failures >= threshold)--> open --(cool-down elapsed)--> trial
//! trial --success--> closed
//! trial --failure--> open (fresh cool-down)
//! ```

mod backoff;
mod breaker;

use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use backoff::{BackoffKind, BackoffPolicy, MAX_JITTER_FACTOR, RetryProfile};
pub use breaker::{BreakerPhase, CircuitBreakerState};
pub(crate) use backoff::millis;

use crate::{
    clock::{Clock, SystemClock, elapsed_between, to_time_delta},
    error::OperationError,
};
use breaker::Admission;

/// Class of remote operation, selecting the default [`RetryProfile`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OperationClass {
    /// Calls sent directly to a contract through a node.
    Direct,
    /// Calls to a hosted HTTP API.
    Api,
    /// Mixed or unknown transport.
    Auto,
}

impl OperationClass {
    pub fn default_profile(&self) -> RetryProfile {
        match self {
            OperationClass::Direct => RetryProfile::direct(),
            OperationClass::Api => RetryProfile::api(),
            OperationClass::Auto => RetryProfile::auto(),
        }
    }
}

/// One try of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Delay slept before this attempt; zero for the first.
    pub delay: Duration,
    /// The failure, if the attempt failed.
    pub error: Option<OperationError>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`ResilientExecutor::execute`].
#[derive(Debug)]
pub struct ExecutionResult<T> {
    /// The value, or the last error seen.
    pub result: Result<T, OperationError>,
    /// Every attempt made, in order. Empty when the breaker rejected the call.
    pub attempts: Vec<OperationAttempt>,
    pub elapsed: Duration,
    /// True when the operation was never run because the breaker was open.
    pub circuit_open: bool,
}

impl<T> ExecutionResult<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn into_result(self) -> Result<T, OperationError> {
        self.result
    }
}

/// Running counters for one operation id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub attempts: u64,
    pub rejections: u64,
}

/// Retry, backoff and circuit breaking for single remote operations.
#[derive(Debug)]
pub struct ResilientExecutor<C = SystemClock> {
    clock: C,
    profiles: HashMap<OperationClass, RetryProfile>,
    breakers: Mutex<HashMap<String, CircuitBreakerState>>,
    stats: Mutex<HashMap<String, RetryStats>>,
}

impl ResilientExecutor<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ResilientExecutor<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: Clock> ResilientExecutor<C> {
    pub fn with_clock(clock: C) -> Self {
        use strum::IntoEnumIterator;

        Self {
            clock,
            profiles: OperationClass::iter()
                .map(|class| (class, class.default_profile()))
                .collect(),
            breakers: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default profile of an operation class.
    pub fn with_profile(mut self, class: OperationClass, profile: RetryProfile) -> Self {
        self.profiles.insert(class, profile);
        self
    }

    /// The profile currently used for `class`.
    pub fn profile(&self, class: OperationClass) -> RetryProfile {
        self.profiles
            .get(&class)
            .cloned()
            .unwrap_or_else(|| class.default_profile())
    }

    /// Run `operation` under the profile of `class`.
    ///
    /// The breaker is keyed by `operation_id`, or by the class name when no id
    /// is given, so all id-less calls of one class share a breaker.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        class: OperationClass,
        operation_id: Option<&str>,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let id = operation_id
            .map(str::to_string)
            .unwrap_or_else(|| class.to_string());
        let profile = self.profile(class);
        self.execute_with_profile(operation, &id, &profile).await
    }

    /// Run `operation` with an explicit profile, overriding the class default.
    pub async fn execute_with_profile<T, F, Fut>(
        &self,
        mut operation: F,
        operation_id: &str,
        profile: &RetryProfile,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let started = self.clock.now();

        let admission = lock(&self.breakers)
            .get(operation_id)
            .map(|state| state.admission(started))
            .unwrap_or(Admission::Allowed);

        if admission == Admission::Rejected {
            tracing::warn!(operation_id, "Circuit breaker open, rejecting call");
            self.update_stats(operation_id, |stats| {
                stats.calls += 1;
                stats.rejections += 1;
            });
            return ExecutionResult {
                result: Err(OperationError::circuit_open(operation_id)),
                attempts: Vec::new(),
                elapsed: Duration::ZERO,
                circuit_open: true,
            };
        }

        let max_attempts = match admission {
            Admission::Trial => {
                tracing::info!(operation_id, "Circuit breaker cool-down elapsed, running trial attempt");
                1
            }
            _ => profile.max_retries.saturating_add(1),
        };

        let mut attempts = Vec::new();
        let mut delay = Duration::ZERO;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let timestamp = self.clock.now();

            match operation().await {
                Ok(value) => {
                    attempts.push(OperationAttempt {
                        attempt,
                        delay,
                        error: None,
                        timestamp,
                    });
                    if let Some(state) = lock(&self.breakers).get_mut(operation_id) {
                        state.record_success();
                    }
                    self.update_stats(operation_id, |stats| {
                        stats.calls += 1;
                        stats.successes += 1;
                        stats.attempts += u64::from(attempt);
                    });
                    if attempt > 1 {
                        tracing::info!(operation_id, attempt, "Operation succeeded after retry");
                    }
                    return ExecutionResult {
                        result: Ok(value),
                        attempts,
                        elapsed: elapsed_between(started, self.clock.now()),
                        circuit_open: false,
                    };
                }
                Err(error) => {
                    attempts.push(OperationAttempt {
                        attempt,
                        delay,
                        error: Some(error.clone()),
                        timestamp,
                    });
                    lock(&self.breakers)
                        .entry(operation_id.to_string())
                        .or_default()
                        .record_failure(self.clock.now());

                    let retryable = profile.is_retryable(error.kind);
                    if attempt == max_attempts || !retryable {
                        tracing::warn!(
                            operation_id,
                            attempt,
                            retryable,
                            error = %error,
                            "Operation failed, giving up"
                        );
                        last_error = Some(error);
                        break;
                    }

                    delay = profile.backoff.delay(attempt - 1);
                    tracing::debug!(
                        operation_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying..."
                    );
                    last_error = Some(error);
                    self.clock.sleep(delay).await;
                }
            }
        }

        let now = self.clock.now();
        {
            let mut breakers = lock(&self.breakers);
            let state = breakers.entry(operation_id.to_string()).or_default();
            if admission == Admission::Trial || state.failures >= profile.failure_threshold {
                state.trip(now, to_time_delta(profile.cool_down));
                tracing::warn!(
                    operation_id,
                    failures = state.failures,
                    cool_down_ms = profile.cool_down.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
        }

        let attempt_count = attempts.len() as u64;
        self.update_stats(operation_id, |stats| {
            stats.calls += 1;
            stats.failures += 1;
            stats.attempts += attempt_count;
        });

        ExecutionResult {
            result: Err(last_error
                .unwrap_or_else(|| OperationError::unknown("operation was never attempted"))),
            attempts,
            elapsed: elapsed_between(started, now),
            circuit_open: false,
        }
    }

    /// Snapshot of the breaker for `operation_id`, if it has ever failed.
    pub fn breaker(&self, operation_id: &str) -> Option<CircuitBreakerState> {
        lock(&self.breakers).get(operation_id).cloned()
    }

    /// Counters for `operation_id`, if it has ever been called.
    pub fn stats(&self, operation_id: &str) -> Option<RetryStats> {
        lock(&self.stats).get(operation_id).cloned()
    }

    /// Forget the breaker and counters of one operation id.
    pub fn reset(&self, operation_id: &str) {
        lock(&self.breakers).remove(operation_id);
        lock(&self.stats).remove(operation_id);
    }

    /// Forget every breaker and counter.
    pub fn clear(&self) {
        lock(&self.breakers).clear();
        lock(&self.stats).clear();
    }

    fn update_stats(&self, operation_id: &str, update: impl FnOnce(&mut RetryStats)) {
        update(lock(&self.stats).entry(operation_id.to_string()).or_default());
    }
}

//! Backoff schedules and retry profiles.

use std::{collections::HashSet, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Upper bound of the multiplicative jitter added to each delay.
pub const MAX_JITTER_FACTOR: f64 = 0.1;

/// How the delay grows between attempts.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BackoffKind {
    /// `base * 2^k`
    #[default]
    Exponential,
    /// `base * (k + 1)`
    Linear,
    /// `base`
    Fixed,
}

/// A backoff schedule: growth kind, base delay, cap and optional jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(kind: BackoffKind, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            kind,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Disable jitter, making every delay deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `retry` (0-based: the delay after the first failure).
    ///
    /// Jitter of up to 10% of the computed delay is added before the cap is applied.
    pub fn delay(&self, retry: u32) -> Duration {
        // Work in nanoseconds so whole-millisecond schedules stay exact.
        let base = self.base_delay.as_nanos() as f64;
        let raw = match self.kind {
            BackoffKind::Exponential => base * 2f64.powi(retry.min(63) as i32),
            BackoffKind::Linear => base * (f64::from(retry) + 1.0),
            BackoffKind::Fixed => base,
        };

        let jittered = if self.jitter {
            raw + rand::rng().random_range(0.0..=MAX_JITTER_FACTOR) * raw
        } else {
            raw
        };

        let cap = self.max_delay.as_nanos() as f64;
        if jittered >= cap {
            self.max_delay
        } else {
            Duration::from_nanos(jittered as u64)
        }
    }
}

/// Everything the executor needs to decide how to retry one class of operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryProfile {
    /// Retries after the first attempt; `max_retries + 1` attempts in total.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Error kinds worth another attempt. Fatal kinds are never retried.
    pub retryable: HashSet<ErrorKind>,
    /// Consecutive failures after which the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing a trial.
    #[serde(with = "millis")]
    pub cool_down: Duration,
}

impl RetryProfile {
    /// Whether a failure of `kind` should be attempted again under this profile.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !kind.is_fatal() && self.retryable.contains(&kind)
    }

    /// Profile for calls sent straight to a contract through a node.
    pub fn direct() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::new(
                BackoffKind::Exponential,
                Duration::from_secs(1),
                Duration::from_secs(10),
            ),
            retryable: HashSet::from([ErrorKind::Network, ErrorKind::Timeout, ErrorKind::Server]),
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }

    /// Profile for hosted HTTP APIs, which throttle more and recover faster.
    pub fn api() -> Self {
        Self {
            max_retries: 5,
            backoff: BackoffPolicy::new(
                BackoffKind::Exponential,
                Duration::from_millis(500),
                Duration::from_secs(30),
            ),
            retryable: HashSet::from([
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::RateLimit,
                ErrorKind::Server,
            ]),
            failure_threshold: 3,
            cool_down: Duration::from_secs(30),
        }
    }

    /// Profile for operations that may go either way.
    pub fn auto() -> Self {
        Self {
            max_retries: 4,
            backoff: BackoffPolicy::new(
                BackoffKind::Linear,
                Duration::from_millis(750),
                Duration::from_secs(15),
            ),
            retryable: HashSet::from([
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::RateLimit,
                ErrorKind::Server,
                ErrorKind::Unknown,
            ]),
            failure_threshold: 4,
            cool_down: Duration::from_secs(45),
        }
    }
}

/// Serialize durations as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

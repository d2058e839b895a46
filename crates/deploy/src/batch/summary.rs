//! Per-item results and the aggregate summary of a batch run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Chain, DeployReceipt};
use crate::{clock::elapsed_between, error::ErrorKind};

/// Outcome of one batch item once its retry loop is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemResult {
    /// Position of the item in the caller's input list.
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub symbol: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<DeployReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Attempts actually made; zero when the item failed pre-flight checks.
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
    pub admin: String,
    pub reward_recipient: String,
}

/// Aggregate of a whole batch run, safe to persist and reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub chain: Chain,
    /// Results in processing order, which is increasing index order.
    pub results: Vec<BatchItemResult>,
    /// Items scheduled for this run. Larger than `results.len()` only when the
    /// run stopped at the first failure.
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    pub(crate) fn new(
        chain: Chain,
        total: usize,
        results: Vec<BatchItemResult>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let success = results.iter().filter(|r| r.success).count();
        let failed = results.len() - success;
        Self {
            chain,
            results,
            total,
            success,
            failed,
            started_at,
            finished_at,
        }
    }

    pub fn duration(&self) -> Duration {
        elapsed_between(self.started_at, self.finished_at)
    }

    /// Whether some scheduled items were never attempted.
    pub fn stopped_early(&self) -> bool {
        self.results.len() < self.total
    }

    /// Indices, in the caller's input list, of the items that failed.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.index)
            .collect()
    }

    /// Share of processed items that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.success as f64 * 100.0 / self.results.len() as f64
    }

    /// Wall time per processed item, inter-item delays included.
    pub fn average_time_per_item(&self) -> Duration {
        match u32::try_from(self.results.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.duration() / n,
        }
    }

    pub fn format_duration(&self) -> String {
        format_duration(self.duration())
    }
}

/// Render a duration as `"{m}m {s}s"`, or `"{s}s"` under a minute.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

//! Per-test rolling execution statistics.
//!
//! Entries are created on the first reported result and never removed; they are
//! the only state expected to outlive a workspace session.

use crate::domain::element::TestId;
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pass,
    Fail,
    Error,
}

impl TestStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Fail | TestStatus::Error)
    }
}

/// One completed run, as reported by the test execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    pub test_id: TestId,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestStats {
    pub exec_count: u64,
    pub failure_count: u64,
    /// Running mean over all executions
    pub avg_duration_ms: f64,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl TestStats {
    pub fn record(&mut self, status: TestStatus, duration_ms: u64, at: DateTime<Utc>) {
        self.exec_count += 1;
        let n = self.exec_count as f64;
        self.avg_duration_ms += (duration_ms as f64 - self.avg_duration_ms) / n;

        if status.is_failure() {
            self.failure_count += 1;
            if self.last_failure_at.is_none_or(|prev| at > prev) {
                self.last_failure_at = Some(at);
            }
        }
        if self.last_run_at.is_none_or(|prev| at > prev) {
            self.last_run_at = Some(at);
        }
    }

    /// Fraction of runs that failed, in `[0, 1]`.
    pub fn failure_rate(&self) -> f64 {
        if self.exec_count == 0 {
            return 0.0;
        }
        (self.failure_count as f64 / self.exec_count as f64).clamp(0.0, 1.0)
    }

    pub fn failed_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_failure_at
            .is_some_and(|at| at <= now && now - at <= window)
    }
}

/// In-memory failure history keyed by test id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureHistory {
    #[serde(default)]
    pub tests: BTreeMap<TestId, TestStats>,
}

impl FailureHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, test_id: &str) -> Option<&TestStats> {
        self.tests.get(test_id)
    }

    /// Fold one result into the running statistics.
    pub fn record(&mut self, result: &ExecutionResult) {
        self.tests
            .entry(result.test_id.clone())
            .or_default()
            .record(result.status, result.duration_ms, result.timestamp);
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TestStatus, duration_ms: u64, hours_ago: i64) -> ExecutionResult {
        ExecutionResult {
            test_id: "a.py:f#0".into(),
            status,
            duration_ms,
            timestamp: Utc::now() - Duration::hours(hours_ago),
        }
    }

    #[test]
    fn test_running_average_and_counts() {
        let mut h = FailureHistory::new();
        h.record(&result(TestStatus::Pass, 100, 3));
        h.record(&result(TestStatus::Fail, 300, 2));
        h.record(&result(TestStatus::Error, 200, 1));

        let s = h.get("a.py:f#0").unwrap();
        assert_eq!(s.exec_count, 3);
        assert_eq!(s.failure_count, 2);
        assert!((s.avg_duration_ms - 200.0).abs() < 1e-9);
        assert!((s.failure_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_last_failure_only_moves_on_failure() {
        let mut h = FailureHistory::new();
        let fail = result(TestStatus::Fail, 10, 30);
        h.record(&fail);
        h.record(&result(TestStatus::Pass, 10, 1));
        let s = h.get("a.py:f#0").unwrap();
        assert_eq!(s.last_failure_at, Some(fail.timestamp));
        assert!(!s.failed_within(Utc::now(), Duration::hours(24)));
        assert!(s.failed_within(Utc::now(), Duration::hours(48)));
    }

    #[test]
    fn test_out_of_order_results_keep_latest_failure() {
        let mut h = FailureHistory::new();
        let recent = result(TestStatus::Fail, 10, 1);
        h.record(&recent);
        h.record(&result(TestStatus::Fail, 10, 5));
        assert_eq!(h.get("a.py:f#0").unwrap().last_failure_at, Some(recent.timestamp));
    }

    #[test]
    fn test_unknown_test_has_no_stats() {
        let h = FailureHistory::new();
        assert!(h.get("nope").is_none());
        assert_eq!(TestStats::default().failure_rate(), 0.0);
    }
}

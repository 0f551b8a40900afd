//! Test Selector - ranks every attached test by graph distance from a change
//! and by failure history, then picks a subset under a time budget and a
//! confidence floor.
//!
//! Score of a test owned by element `e` at reverse-edge distance `d` from the
//! change:
//!
//! | term | value |
//! |------|-------|
//! | `d = 0` | 2.0 |
//! | `d = 1` | 1.0 |
//! | `d ≥ 2` | `max(0, 0.5 - 0.1 * (d - 2))` |
//! | failed within the recent window | +1.0 |
//! | failure rate | +0.5 × rate |
//!
//! Tests scoring above [`MANDATORY_SCORE`] always run. The rest fill the time
//! budget in score order (or, without a budget, everything at or above
//! [`UNBUDGETED_MIN_SCORE`]). If the resulting confidence is below the
//! threshold, the best remaining tests are backfilled until it is met.

use crate::domain::element::{ElementId, TestId};
use crate::domain::graph::DependencyGraph;
use crate::domain::history::{FailureHistory, TestStats};
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DIRECT_CHANGE_SCORE: f64 = 2.0;
pub const ONE_HOP_SCORE: f64 = 1.0;
pub const FIRST_EXTRA_HOP_SCORE: f64 = 0.5;
pub const EXTRA_HOP_DECAY: f64 = 0.1;
pub const RECENT_FAILURE_SCORE: f64 = 1.0;
pub const FAILURE_RATE_WEIGHT: f64 = 0.5;

/// Tests scoring strictly above this are always selected.
pub const MANDATORY_SCORE: f64 = 1.0;
/// Without a time budget, tests at or above this are selected.
pub const UNBUDGETED_MIN_SCORE: f64 = 0.5;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Why a test made it into the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    DirectChange,
    DependencyImpact,
    RecentFailure,
    Flaky,
    /// No impact signal, but it fit in the time budget
    TimeBudget,
    ConfidenceBackfill,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorParams {
    /// Reverse-edge hops considered when scoring
    pub max_depth: usize,
    pub recent_failure_window: Duration,
    /// Estimate for tests without history
    pub default_duration_ms: u64,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            recent_failure_window: Duration::hours(24),
            default_duration_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionRequest {
    /// Changed (added, modified or deleted) element ids
    pub changed: Vec<ElementId>,
    /// Elements treated as one hop from the change (callers of deleted elements)
    pub adjacent: Vec<ElementId>,
    pub time_budget_ms: Option<u64>,
    pub confidence_threshold: f64,
}

impl SelectionRequest {
    pub fn new(changed: Vec<ElementId>) -> Self {
        Self {
            changed,
            adjacent: Vec::new(),
            time_budget_ms: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_budget(mut self, time_budget_ms: Option<u64>) -> Self {
        self.time_budget_ms = time_budget_ms;
        self
    }

    pub fn with_threshold(mut self, confidence_threshold: f64) -> Self {
        self.confidence_threshold = confidence_threshold;
        self
    }

    pub fn with_adjacent(mut self, adjacent: Vec<ElementId>) -> Self {
        self.adjacent = adjacent;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SelectionEntry {
    pub test_id: TestId,
    pub owner_id: ElementId,
    pub score: f64,
    pub reason: SelectionReason,
    /// Reverse-edge distance of the owner from the change, if reached
    pub distance: Option<usize>,
    pub estimated_duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestSelection {
    /// Ranked by score, highest first
    pub entries: Vec<SelectionEntry>,
    pub selected_count: usize,
    pub skipped_count: usize,
    pub total_count: usize,
    pub estimated_duration_ms: u64,
    pub estimated_time_saved_ms: u64,
    pub confidence: f64,
    pub threshold_met: bool,
}

impl TestSelection {
    pub fn contains(&self, test_id: &str) -> bool {
        self.entries.iter().any(|t| t.test_id == test_id)
    }

    pub fn get(&self, test_id: &str) -> Option<&SelectionEntry> {
        self.entries.iter().find(|t| t.test_id == test_id)
    }
}

/// A scored candidate before selection
#[derive(Debug, Clone)]
struct Candidate {
    test_id: TestId,
    owner_id: ElementId,
    score: f64,
    distance: Option<usize>,
    recent_failure: bool,
    failure_rate: f64,
    duration_ms: u64,
}

impl Candidate {
    fn reason(&self) -> SelectionReason {
        match self.distance {
            Some(0) => SelectionReason::DirectChange,
            Some(_) => SelectionReason::DependencyImpact,
            None if self.recent_failure => SelectionReason::RecentFailure,
            None if self.failure_rate > 0.0 => SelectionReason::Flaky,
            None => SelectionReason::TimeBudget,
        }
    }

    fn selected(&self, reason: SelectionReason) -> SelectionEntry {
        SelectionEntry {
            test_id: self.test_id.clone(),
            owner_id: self.owner_id.clone(),
            score: self.score,
            reason,
            distance: self.distance,
            estimated_duration_ms: self.duration_ms,
        }
    }
}

/// Score contributed by graph distance alone.
pub fn distance_score(distance: usize) -> f64 {
    match distance {
        0 => DIRECT_CHANGE_SCORE,
        1 => ONE_HOP_SCORE,
        d => (FIRST_EXTRA_HOP_SCORE - EXTRA_HOP_DECAY * (d - 2) as f64).max(0.0),
    }
}

/// Mean of the count ratio and the score ratio, clamped to `[0, 1]`.
///
/// An empty pool is fully covered; a pool with no score at all counts as
/// fully covered on the score axis.
pub fn confidence(
    selected_count: usize,
    total_count: usize,
    selected_score: f64,
    total_score: f64,
) -> f64 {
    if total_count == 0 {
        return 1.0;
    }
    let count_ratio = selected_count as f64 / total_count as f64;
    let score_ratio = if total_score > 0.0 {
        selected_score / total_score
    } else {
        1.0
    };
    ((count_ratio + score_ratio) / 2.0).clamp(0.0, 1.0)
}

/// Test Selector
#[derive(Debug, Clone, Default)]
pub struct TestSelector {
    params: SelectorParams,
}

impl TestSelector {
    pub fn new(params: SelectorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SelectorParams {
        &self.params
    }

    /// Score of one test given its owner's distance and its history.
    pub fn score(&self, distance: Option<usize>, stats: Option<&TestStats>, now: DateTime<Utc>) -> f64 {
        let mut score = distance.map(distance_score).unwrap_or(0.0);
        if let Some(stats) = stats {
            if stats.failed_within(now, self.params.recent_failure_window) {
                score += RECENT_FAILURE_SCORE;
            }
            score += FAILURE_RATE_WEIGHT * stats.failure_rate();
        }
        score
    }

    pub fn select(
        &self,
        graph: &DependencyGraph,
        history: &FailureHistory,
        request: &SelectionRequest,
        now: DateTime<Utc>,
    ) -> TestSelection {
        let seeds: Vec<(ElementId, usize)> = request
            .changed
            .iter()
            .map(|id| (id.clone(), 0))
            .chain(request.adjacent.iter().map(|id| (id.clone(), 1)))
            .collect();
        let distances = graph.impact_distances(&seeds, Some(self.params.max_depth));

        let mut pool = self.candidates(graph, history, &distances, now);
        pool.sort_by(rank);

        let total_count = pool.len();
        let total_score: f64 = pool.iter().map(|c| c.score).sum();

        let mut selected: Vec<SelectionEntry> = Vec::new();
        let mut remaining: Vec<Candidate> = Vec::new();
        for c in pool {
            if c.score > MANDATORY_SCORE {
                selected.push(c.selected(c.reason()));
            } else {
                remaining.push(c);
            }
        }

        let mut rest = remaining.into_iter().peekable();
        match request.time_budget_ms {
            Some(budget) => {
                let mut used: u64 = selected.iter().map(|t| t.estimated_duration_ms).sum();
                while let Some(c) = rest.peek() {
                    if used.saturating_add(c.duration_ms) > budget {
                        break;
                    }
                    used = used.saturating_add(c.duration_ms);
                    selected.push(c.selected(c.reason()));
                    rest.next();
                }
            }
            None => {
                while let Some(c) = rest.next_if(|c| c.score >= UNBUDGETED_MIN_SCORE) {
                    selected.push(c.selected(c.reason()));
                }
            }
        }

        let mut selected_score: f64 = selected.iter().map(|t| t.score).sum();
        let mut conf = confidence(selected.len(), total_count, selected_score, total_score);
        for c in rest {
            if conf >= request.confidence_threshold {
                break;
            }
            selected_score += c.score;
            selected.push(c.selected(SelectionReason::ConfidenceBackfill));
            conf = confidence(selected.len(), total_count, selected_score, total_score);
        }

        let skipped_ms: u64 = {
            let chosen: std::collections::HashSet<&str> =
                selected.iter().map(|t| t.test_id.as_str()).collect();
            graph
                .tests()
                .filter(|t| !chosen.contains(t.test_id.as_str()))
                .map(|t| self.estimated_duration(history.get(&t.test_id)))
                .sum()
        };

        selected.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.test_id.cmp(&b.test_id))
        });

        let selection = TestSelection {
            selected_count: selected.len(),
            skipped_count: total_count - selected.len(),
            total_count,
            estimated_duration_ms: selected.iter().map(|t| t.estimated_duration_ms).sum(),
            estimated_time_saved_ms: skipped_ms,
            threshold_met: conf >= request.confidence_threshold,
            confidence: conf,
            entries: selected,
        };
        tracing::info!(
            changed = request.changed.len(),
            selected = selection.selected_count,
            skipped = selection.skipped_count,
            confidence = selection.confidence,
            "Selected tests"
        );
        selection
    }

    fn candidates(
        &self,
        graph: &DependencyGraph,
        history: &FailureHistory,
        distances: &BTreeMap<ElementId, usize>,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        graph
            .tests()
            .map(|t| {
                let stats = history.get(&t.test_id);
                let distance = distances.get(&t.owner_id).copied();
                Candidate {
                    test_id: t.test_id.clone(),
                    owner_id: t.owner_id.clone(),
                    score: self.score(distance, stats, now),
                    distance,
                    recent_failure: stats
                        .is_some_and(|s| s.failed_within(now, self.params.recent_failure_window)),
                    failure_rate: stats.map(TestStats::failure_rate).unwrap_or(0.0),
                    duration_ms: self.estimated_duration(stats),
                }
            })
            .collect()
    }

    fn estimated_duration(&self, stats: Option<&TestStats>) -> u64 {
        match stats {
            Some(s) if s.exec_count > 0 => s.avg_duration_ms.round().max(0.0) as u64,
            _ => self.params.default_duration_ms,
        }
    }
}

/// Highest score first, then test id for determinism.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.test_id.cmp(&b.test_id))
}

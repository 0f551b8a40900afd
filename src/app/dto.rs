use crate::domain::change::ChangeSet;
use crate::domain::element::{ElementId, TestRecord};
use crate::domain::graph::BuildStats;
use crate::domain::history::ExecutionResult;
use crate::domain::selector::TestSelection;
use chrono::{DateTime, Utc};
use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    pub root: String,
    pub cache_dir: String,
    pub hash_mode: String,
    pub file_count: usize,
    pub element_count: usize,
    pub edge_count: usize,
    pub heuristic_edge_count: usize,
    pub test_count: usize,
    /// Tests with at least one recorded execution
    pub tracked_test_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildResponse {
    #[serde(flatten)]
    pub stats: BuildStats,
    /// Files whose parse failed and contributed no elements
    pub parse_failures: Vec<String>,
}

/// A workspace-relative (or absolute, inside the root) file path
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateFileResponse {
    pub path: String,
    pub removed: Vec<ElementId>,
    pub inserted: Vec<ElementId>,
    /// Callers in other files whose calls were re-resolved
    pub rewired_callers: usize,
    pub parse_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// Notification from a file watcher
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileEvent {
    pub path: String,
    pub kind: FileEventKind,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileEventResponse {
    pub path: String,
    pub kind: FileEventKind,
    /// Set when the event triggered a full reload
    pub rebuild: Option<BuildStats>,
    pub changes: ChangeSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ElementRequest {
    /// Element id, `<file_path>:<qualified_name>`
    pub id: ElementId,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NeighborsResponse {
    pub id: ElementId,
    pub elements: Vec<ElementId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImpactRequest {
    pub ids: Vec<ElementId>,
    /// Reverse-edge hops to follow; omitted means the full closure
    #[serde(default)]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImpactResponse {
    pub impacted: Vec<ElementId>,
    pub tests: Vec<TestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelectRequest {
    /// Changed (added, modified or deleted) element ids
    pub changed: Vec<ElementId>,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    /// Defaults to the configured threshold
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AffectedRequest {
    /// Files to check; empty checks every file in the workspace
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AffectedResponse {
    /// Only files with at least one changed element
    pub changes: Vec<ChangeSet>,
    pub selection: TestSelection,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordRequest {
    pub results: Vec<ExecutionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordResponse {
    pub recorded: usize,
    pub tracked_test_count: usize,
}

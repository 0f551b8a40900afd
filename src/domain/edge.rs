use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Edge kind - only call relationships are tracked
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls, // Element → Element
}

/// How a call name was bound to its target
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Same-class method or same-file function
    Exact,
    /// Workspace-wide method name match; favours recall over precision
    Heuristic,
}

/// Weight of a call edge. One edge exists per call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub kind: EdgeKind,
    pub resolution: Resolution,
    /// Callee name as resolved (last segment of the raw call)
    pub callee_name: String,
    pub site_line: u32,
}

impl DependencyEdge {
    pub fn call(callee_name: impl Into<String>, site_line: u32, resolution: Resolution) -> Self {
        Self {
            kind: EdgeKind::Calls,
            resolution,
            callee_name: callee_name.into(),
            site_line,
        }
    }
}

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Composite element key: `<file_path>:<qualified_name>`, e.g. `pkg/a.py:Derp.foo`.
pub type ElementId = String;

/// Test key: `<owner element id>#<ordinal>`.
pub type TestId = String;

/// Element kind
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Function,
    Method,
    Class,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Function => "function",
            ElementKind::Method => "method",
            ElementKind::Class => "class",
        }
    }
}

/// Unresolved call reference found in an element body
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawCall {
    /// Callee as written, possibly with a receiver (`self.foo`, `Derp.foo`)
    pub name: String,
    /// 1-based line of the call site
    #[serde(default)]
    pub line: u32,
}

impl RawCall {
    pub fn new(name: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }

    /// Name used for resolution: the last `.`-separated segment.
    pub fn callee_name(&self) -> &str {
        simple_name(&self.name)
    }
}

/// Source location of an attached test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TestLocation {
    pub file_path: String,
    pub line: u32,
}

/// A test assertion attached to a code element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TestRecord {
    pub test_id: TestId,
    pub owner_id: ElementId,
    pub ordinal: usize,
    pub assertion_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    pub location: TestLocation,
}

/// A function, method or class known to the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeElement {
    pub id: ElementId,
    pub kind: ElementKind,
    pub qualified_name: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    /// Set iff `kind == Method`; points at the owning class
    pub parent_id: Option<ElementId>,
    pub parameters: Vec<String>,
    pub raw_calls: Vec<RawCall>,
    pub content_hash: String,
    pub attached_test_ids: Vec<TestId>,
}

impl CodeElement {
    /// Unqualified name (`foo` for `Derp.foo`).
    pub fn name(&self) -> &str {
        simple_name(&self.qualified_name)
    }

    pub fn is_top_level_function(&self) -> bool {
        self.kind == ElementKind::Function && self.parent_id.is_none()
    }
}

pub fn element_id(file_path: &str, qualified_name: &str) -> ElementId {
    format!("{file_path}:{qualified_name}")
}

pub fn test_id(owner_id: &str, ordinal: usize) -> TestId {
    format!("{owner_id}#{ordinal}")
}

/// Last `.`-separated segment of a dotted name.
pub fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

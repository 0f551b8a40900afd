//! Element feed: the contract between a source parser and the dependency graph.
//!
//! A parser reports, per file, the functions, methods and classes it found along
//! with their raw body text, the call names referenced in the body and any test
//! assertions attached to them. The graph never looks at source code itself;
//! everything it knows arrives through this feed, so the same engine serves any
//! language a parser adapter exists for.

use crate::domain::element::{
    CodeElement, ElementKind, RawCall, TestLocation, TestRecord, element_id, test_id,
};
use crate::domain::hasher::{HashMode, content_hash};
use serde::{Deserialize, Serialize};

/// One code element as reported by a parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ParsedElement {
    /// Dotted name within the file (`Derp.foo`)
    pub qualified_name: String,
    pub kind: ElementKind,
    pub line_start: u32,
    pub line_end: u32,
    /// Qualified name of the owning class, for methods
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Raw body text, hashed after normalisation
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub calls: Vec<ParsedCall>,
    #[serde(default)]
    pub tests: Vec<ParsedTest>,
}

/// A call reference. Parsers may send a bare name or a `{name, line}` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(untagged)]
pub enum ParsedCall {
    Name(String),
    Site { name: String, line: u32 },
}

impl ParsedCall {
    fn into_raw(self, fallback_line: u32) -> RawCall {
        match self {
            ParsedCall::Name(name) => RawCall::new(name, fallback_line),
            ParsedCall::Site { name, line } => RawCall::new(name, line),
        }
    }
}

/// A test assertion attached to an element (e.g. a doctest line)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ParsedTest {
    pub assertion_text: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub line: u32,
}

/// Elements of one file plus their attached tests, ready for graph insertion.
#[derive(Debug, Clone, Default)]
pub struct FileElements {
    pub elements: Vec<CodeElement>,
    pub tests: Vec<TestRecord>,
}

impl FileElements {
    /// Convert a parser feed into graph elements, hashing every body.
    ///
    /// Methods whose declared parent is missing from the feed are demoted to
    /// functions so that `parent_id` is only ever set on methods with a class.
    pub fn from_feed(file_path: &str, parsed: Vec<ParsedElement>, mode: HashMode) -> Self {
        let classes: std::collections::HashSet<String> = parsed
            .iter()
            .filter(|p| p.kind == ElementKind::Class)
            .map(|p| p.qualified_name.clone())
            .collect();

        let mut out = FileElements::default();
        let mut seen = std::collections::HashSet::new();

        for p in parsed {
            let id = element_id(file_path, &p.qualified_name);
            if !seen.insert(id.clone()) {
                tracing::debug!(element = %id, "Duplicate element in feed, keeping first");
                continue;
            }

            let parent = p
                .parent
                .as_ref()
                .filter(|parent| classes.contains(*parent))
                .cloned();
            let kind = match (p.kind, &parent) {
                (ElementKind::Method, None) => ElementKind::Function,
                (ElementKind::Function, Some(_)) => ElementKind::Method,
                (kind, _) => kind,
            };
            let parent_id = match kind {
                ElementKind::Method => parent.map(|parent| element_id(file_path, &parent)),
                _ => None,
            };

            let mut attached_test_ids = Vec::with_capacity(p.tests.len());
            for (ordinal, t) in p.tests.into_iter().enumerate() {
                let tid = test_id(&id, ordinal);
                attached_test_ids.push(tid.clone());
                out.tests.push(TestRecord {
                    test_id: tid,
                    owner_id: id.clone(),
                    ordinal,
                    assertion_text: t.assertion_text,
                    expected: t.expected,
                    location: TestLocation {
                        file_path: file_path.to_string(),
                        line: if t.line > 0 { t.line } else { p.line_start },
                    },
                });
            }

            out.elements.push(CodeElement {
                content_hash: content_hash(&p.body, mode),
                id,
                kind,
                qualified_name: p.qualified_name,
                file_path: file_path.to_string(),
                line_start: p.line_start,
                line_end: p.line_end,
                parent_id,
                parameters: p.parameters,
                raw_calls: p
                    .calls
                    .into_iter()
                    .map(|c| c.into_raw(p.line_start))
                    .collect(),
                attached_test_ids,
            });
        }
        out
    }
}

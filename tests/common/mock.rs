//! Mock implementations for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use test_impact::domain::element::ElementKind;
use test_impact::domain::feed::{ParsedCall, ParsedElement, ParsedTest};
use test_impact::domain::ports::{SourceParser, SourceReader};

/// Mock SourceReader that serves content from an in-memory map.
///
/// Files can be replaced or removed while the reader is shared behind an `Arc`.
pub struct MockSourceReader {
    files: Mutex<HashMap<PathBuf, String>>,
}

impl MockSourceReader {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_file(self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.add_file(path, content);
        self
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.files.lock().unwrap().remove(path.as_ref());
    }
}

impl Default for MockSourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for MockSourceReader {
    fn read(&self, path: &Path) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("File not found: {}", path.display()))
    }
}

/// Line-oriented parser for `.mock` files, one element per line:
///
/// ```text
/// class K
/// K.go -> helper
/// run -> go, other | >>> run()
/// ```
///
/// A dotted name is a method of the class before the dot. The line text is the
/// element body, so editing a line modifies exactly that element. A line that
/// reads `!!` makes the whole file fail to parse.
pub struct MockParser;

impl SourceParser for MockParser {
    fn supports(&self, path: &str) -> bool {
        path.ends_with(".mock")
    }

    fn parse(&self, path: &str, source: &str) -> Result<Vec<ParsedElement>> {
        let mut out = Vec::new();
        for (i, line) in source.lines().enumerate() {
            let line_no = i as u32 + 1;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if text == "!!" {
                bail!("{path}:{line_no}: syntax error");
            }
            if let Some(name) = text.strip_prefix("class ") {
                out.push(element(name.trim(), ElementKind::Class, None, line_no, text));
                continue;
            }

            let (decl, test) = match text.split_once('|') {
                Some((decl, test)) => (decl.trim(), Some(test.trim())),
                None => (text, None),
            };
            let (name, calls) = match decl.split_once("->") {
                Some((name, calls)) => (name.trim(), calls),
                None => (decl, ""),
            };
            let (kind, parent) = match name.rsplit_once('.') {
                Some((class, _)) => (ElementKind::Method, Some(class.to_string())),
                None => (ElementKind::Function, None),
            };

            let mut el = element(name, kind, parent, line_no, text);
            el.calls = calls
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| ParsedCall::Site {
                    name: c.to_string(),
                    line: line_no,
                })
                .collect();
            if let Some(assertion) = test {
                el.tests.push(ParsedTest {
                    assertion_text: assertion.to_string(),
                    expected: None,
                    line: line_no,
                });
            }
            out.push(el);
        }
        Ok(out)
    }
}

fn element(
    name: &str,
    kind: ElementKind,
    parent: Option<String>,
    line: u32,
    body: &str,
) -> ParsedElement {
    ParsedElement {
        qualified_name: name.to_string(),
        kind,
        line_start: line,
        line_end: line,
        parent,
        parameters: vec![],
        body: body.to_string(),
        calls: vec![],
        tests: vec![],
    }
}

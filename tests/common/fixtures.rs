//! Feed builders and Python source fixtures for integration tests.
#![allow(dead_code)]

use std::path::Path;

use test_impact::domain::element::ElementKind;
use test_impact::domain::feed::{FileElements, ParsedCall, ParsedElement, ParsedTest};
use test_impact::domain::hasher::HashMode;

/// Class `Derp` with two methods; `foo` carries a doctest.
pub const DERP_PY: &str = r#"class Derp:
    """A small class."""

    def __init__(self):
        self.n = 1

    def foo(self, x):
        """
        >>> Derp().foo(2)
        3
        """
        return x + self.n


def helper():
    return 0
"#;

/// `Derp.foo` with an edited body; everything else untouched.
pub const DERP_PY_EDITED: &str = r#"class Derp:
    """A small class."""

    def __init__(self):
        self.n = 1

    def foo(self, x):
        """
        >>> Derp().foo(2)
        3
        """
        return x + self.n + 0


def helper():
    return 0
"#;

/// `Derp.foo` removed.
pub const DERP_PY_WITHOUT_FOO: &str = r#"class Derp:
    """A small class."""

    def __init__(self):
        self.n = 1


def helper():
    return 0
"#;

/// A caller of `Derp.foo` plus an unrelated `fibonacci`, both with doctests.
pub const FULL_TEST_PY: &str = r#"from derp import Derp


def check_derp():
    """
    >>> check_derp()
    3
    """
    d = Derp()
    return d.foo(2)


def fibonacci(n):
    """
    >>> fibonacci(10)
    55
    """
    if n < 2:
        return n
    return fibonacci(n - 1) + fibonacci(n - 2)
"#;

pub fn function(name: &str, calls: &[&str]) -> ParsedElement {
    ParsedElement {
        qualified_name: name.to_string(),
        kind: ElementKind::Function,
        line_start: 1,
        line_end: 2,
        parent: None,
        parameters: vec![],
        body: format!("def {name}():\n    return {}\n", calls.join(" + ")),
        calls: calls.iter().map(|c| ParsedCall::Name(c.to_string())).collect(),
        tests: vec![],
    }
}

pub fn class(name: &str) -> ParsedElement {
    ParsedElement {
        kind: ElementKind::Class,
        body: format!("class {name}:\n    pass\n"),
        ..function(name, &[])
    }
}

pub fn method(class: &str, name: &str, calls: &[&str]) -> ParsedElement {
    ParsedElement {
        qualified_name: format!("{class}.{name}"),
        kind: ElementKind::Method,
        parent: Some(class.to_string()),
        parameters: vec!["self".to_string()],
        ..function(name, calls)
    }
}

/// Attach one doctest-style assertion.
pub fn with_test(mut element: ParsedElement, assertion: &str) -> ParsedElement {
    element.tests.push(ParsedTest {
        assertion_text: assertion.to_string(),
        expected: None,
        line: 0,
    });
    element
}

pub fn with_body(mut element: ParsedElement, body: &str) -> ParsedElement {
    element.body = body.to_string();
    element
}

pub fn file(path: &str, parsed: Vec<ParsedElement>) -> (String, FileElements) {
    (
        path.to_string(),
        FileElements::from_feed(path, parsed, HashMode::Normalized),
    )
}

/// Write `files` under `root`, creating parent directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
}

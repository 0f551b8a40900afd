//! Python parser backed by tree-sitter.
//!
//! Emits top-level functions, top-level classes and the methods defined
//! directly in a class body. Nested functions and nested classes stay part of
//! their enclosing body. Doctest lines (`>>> expr`) in an element's docstring
//! become its attached tests.

use crate::domain::element::ElementKind;
use crate::domain::feed::{ParsedCall, ParsedElement, ParsedTest};
use crate::domain::ports::SourceParser;
use anyhow::{Result, anyhow, bail};
use tree_sitter::Node;

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

fn first_row(node: Node<'_>) -> usize {
    node.start_position().row
}

/// Last row holding text of `node`; a range ending at column 0 stops on the previous row.
fn last_row(node: Node<'_>) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    }
}

/// The `def`/`class` node behind a statement, looking through decorators.
fn definition(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "function_definition" | "class_definition" => Some(node),
        "decorated_definition" => node.child_by_field_name("definition"),
        _ => None,
    }
}

/// An outline entry: `outer` includes decorators, `def` is the definition itself.
#[derive(Debug)]
struct Block<'t> {
    name: String,
    kind: ElementKind,
    parent: Option<String>,
    outer: Node<'t>,
    def: Node<'t>,
}

impl Block<'_> {
    fn rows(&self) -> std::ops::RangeInclusive<usize> {
        first_row(self.outer)..=last_row(self.outer)
    }
}

fn outline<'t>(root: Node<'t>, source: &str) -> Vec<Block<'t>> {
    let mut blocks = Vec::new();
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        let Some(def) = definition(stmt) else {
            continue;
        };
        let Some(name) = def.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name, source).to_string();
        if def.kind() == "function_definition" {
            blocks.push(Block {
                name,
                kind: ElementKind::Function,
                parent: None,
                outer: stmt,
                def,
            });
            continue;
        }
        let methods = methods(def, &name, source);
        blocks.push(Block {
            name,
            kind: ElementKind::Class,
            parent: None,
            outer: stmt,
            def,
        });
        blocks.extend(methods);
    }
    blocks
}

fn methods<'t>(class: Node<'t>, class_name: &str, source: &str) -> Vec<Block<'t>> {
    let Some(body) = class.child_by_field_name("body") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = body.walk();
    for stmt in body.named_children(&mut cursor) {
        let Some(def) = definition(stmt).filter(|d| d.kind() == "function_definition") else {
            continue;
        };
        let Some(name) = def.child_by_field_name("name") else {
            continue;
        };
        out.push(Block {
            name: format!("{class_name}.{}", node_text(name, source)),
            kind: ElementKind::Method,
            parent: Some(class_name.to_string()),
            outer: stmt,
            def,
        });
    }
    out
}

fn parameters(def: Node<'_>, source: &str) -> Vec<String> {
    let Some(params) = def.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = params.walk();
    params
        .named_children(&mut cursor)
        .filter_map(|p| match p.kind() {
            "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                Some(node_text(p, source).to_string())
            }
            "default_parameter" | "typed_default_parameter" => p
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string()),
            "typed_parameter" => p.named_child(0).map(|n| node_text(n, source).to_string()),
            _ => None,
        })
        .collect()
}

/// `a`, `a.b`, `a.b.c` made of plain identifiers.
fn is_dotted(node: Node<'_>) -> bool {
    match node.kind() {
        "identifier" => true,
        "attribute" => node.child_by_field_name("object").is_some_and(is_dotted),
        _ => false,
    }
}

/// Name a call site refers to. `obj.m()` keeps its receiver, `make().m()` keeps only `m`.
fn callee_name(func: Node<'_>, source: &str) -> Option<String> {
    match func.kind() {
        "identifier" => Some(node_text(func, source).to_string()),
        "attribute" if is_dotted(func) => Some(
            node_text(func, source)
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect(),
        ),
        "attribute" => func
            .child_by_field_name("attribute")
            .map(|a| node_text(a, source).to_string()),
        _ => None,
    }
}

/// Call sites under `node`, skipping the subtrees listed in `skip`.
fn collect_calls<'t>(node: Node<'t>, source: &str, skip: &[Node<'t>], out: &mut Vec<ParsedCall>) {
    if skip.contains(&node) {
        return;
    }
    if node.kind() == "call"
        && let Some(name) = node
            .child_by_field_name("function")
            .and_then(|f| callee_name(f, source))
    {
        out.push(ParsedCall::Site {
            name,
            line: first_row(node) as u32 + 1,
        });
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_calls(child, source, skip, out);
    }
}

/// String node of the first statement in a `def`/`class` body, if it is a docstring.
fn docstring(def: Node<'_>) -> Option<Node<'_>> {
    let body = def.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    first.named_child(0).filter(|n| n.kind() == "string")
}

fn doctests(lines: &[&str], rows: std::ops::RangeInclusive<usize>) -> Vec<ParsedTest> {
    let mut tests: Vec<ParsedTest> = Vec::new();
    let mut collecting_expected = false;
    for row in rows {
        let Some(text) = lines.get(row) else {
            break;
        };
        let trimmed = text.trim();
        if let Some(expr) = trimmed.strip_prefix(">>>") {
            tests.push(ParsedTest {
                assertion_text: expr.trim().to_string(),
                expected: None,
                line: row as u32 + 1,
            });
            collecting_expected = true;
            continue;
        }
        let Some(last) = tests.last_mut() else {
            continue;
        };
        if !collecting_expected {
            continue;
        }
        if let Some(cont) = trimmed.strip_prefix("...")
            && last.expected.is_none()
        {
            last.assertion_text.push('\n');
            last.assertion_text.push_str(cont.trim());
            continue;
        }
        let closing = trimmed.starts_with("\"\"\"") || trimmed.starts_with("'''");
        if trimmed.is_empty() || closing {
            collecting_expected = false;
            continue;
        }
        let text = trimmed
            .trim_end_matches("\"\"\"")
            .trim_end_matches("'''")
            .trim_end();
        match &mut last.expected {
            Some(expected) => {
                expected.push('\n');
                expected.push_str(text);
            }
            None => last.expected = Some(text.to_string()),
        }
        if text.len() != trimmed.len() {
            collecting_expected = false;
        }
    }
    tests
}

/// Python parser
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonOutlineParser;

impl PythonOutlineParser {
    pub fn new() -> Self {
        Self
    }

    fn syntax_tree(source: &str) -> Result<tree_sitter::Tree> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| anyhow!("Python grammar version mismatch: {e}"))?;
        parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("tree-sitter returned no tree"))
    }
}

impl SourceParser for PythonOutlineParser {
    fn supports(&self, path: &str) -> bool {
        path.ends_with(".py") || path.ends_with(".pyi")
    }

    fn parse(&self, path: &str, source: &str) -> Result<Vec<ParsedElement>> {
        let tree = Self::syntax_tree(source)?;
        let root = tree.root_node();
        if root.has_error() {
            bail!("Syntax error in {path}");
        }

        let lines: Vec<&str> = source.lines().collect();
        let blocks = outline(root, source);

        let elements = blocks
            .iter()
            .map(|block| {
                let methods: Vec<&Block> = match block.kind {
                    ElementKind::Class => blocks
                        .iter()
                        .filter(|b| b.parent.as_deref() == Some(block.name.as_str()))
                        .collect(),
                    _ => Vec::new(),
                };
                let body = block
                    .rows()
                    .filter(|row| !methods.iter().any(|m| m.rows().contains(row)))
                    .filter_map(|row| lines.get(row).copied())
                    .collect::<Vec<_>>()
                    .join("\n");

                let skip: Vec<Node<'_>> = methods.iter().map(|m| m.outer).collect();
                let mut calls = Vec::new();
                collect_calls(block.outer, source, &skip, &mut calls);

                let tests = docstring(block.def)
                    .map(|doc| doctests(&lines, first_row(doc)..=last_row(doc)))
                    .unwrap_or_default();

                ParsedElement {
                    qualified_name: block.name.clone(),
                    kind: block.kind,
                    line_start: first_row(block.outer) as u32 + 1,
                    line_end: last_row(block.outer) as u32 + 1,
                    parent: block.parent.clone(),
                    parameters: match block.kind {
                        ElementKind::Class => Vec::new(),
                        _ => parameters(block.def, source),
                    },
                    body,
                    calls,
                    tests,
                }
            })
            .collect();
        Ok(elements)
    }
}

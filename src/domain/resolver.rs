//! Call-name resolution.
//!
//! Deterministic, first match wins:
//! 1. a method of the caller's own class (same file),
//! 2. a top-level function in the caller's file,
//! 3. the lexicographically first method of that name anywhere in the workspace,
//! 4. nothing.
//!
//! Steps 1 and 2 produce [`Resolution::Exact`] edges, step 3 produces
//! [`Resolution::Heuristic`] ones.

use crate::domain::edge::Resolution;
use crate::domain::element::{CodeElement, ElementKind, element_id};
use crate::domain::graph::DependencyGraph;
use petgraph::stable_graph::NodeIndex;

pub fn resolve(
    graph: &DependencyGraph,
    caller: &CodeElement,
    callee: &str,
) -> Option<(NodeIndex, Resolution)> {
    if callee.is_empty() {
        return None;
    }

    if let Some(parent_id) = &caller.parent_id
        && let Some(idx) = graph.node_index(&format!("{parent_id}.{callee}"))
        && graph.node(idx).kind == ElementKind::Method
    {
        return Some((idx, Resolution::Exact));
    }

    if let Some(idx) = graph.node_index(&element_id(&caller.file_path, callee))
        && graph.node(idx).is_top_level_function()
    {
        return Some((idx, Resolution::Exact));
    }

    graph
        .methods_named(callee)
        .and_then(|ids| ids.iter().next())
        .and_then(|id| graph.node_index(id))
        .map(|idx| (idx, Resolution::Heuristic))
}

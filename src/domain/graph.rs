use crate::domain::edge::{DependencyEdge, EdgeKind, Resolution};
use crate::domain::element::{CodeElement, ElementId, ElementKind, TestId, TestRecord};
use crate::domain::error::GraphError;
use crate::domain::feed::FileElements;
use crate::domain::resolver;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Dependency Graph - elements, call edges and the indexes that keep
/// incremental updates and resolution cheap.
///
/// Backed by a `StableDiGraph` so removing one file's nodes leaves every other
/// `NodeIndex` valid. Incoming edges double as the reverse (dependents) index.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<CodeElement, DependencyEdge>,

    /// Mapping from element id to node index
    id_to_node: HashMap<ElementId, NodeIndex>,

    /// File path -> ids of its elements, in feed order
    files: BTreeMap<String, Vec<ElementId>>,

    /// Method name -> method ids, sorted (resolution step 3)
    methods_by_name: HashMap<String, BTreeSet<ElementId>>,

    /// Callee name -> ids of elements whose body references it
    callers_by_name: HashMap<String, BTreeSet<ElementId>>,

    tests: BTreeMap<TestId, TestRecord>,
}

/// Counts reported by a full build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildStats {
    pub files: usize,
    pub elements: usize,
    pub edges: usize,
    pub heuristic_edges: usize,
    pub tests: usize,
}

/// What an incremental update did to the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub removed: Vec<ElementId>,
    pub inserted: Vec<ElementId>,
    /// Direct callers (outside the updated file) each removed element had
    pub former_dependents: BTreeMap<ElementId, BTreeSet<ElementId>>,
    /// Callers in other files whose calls were re-resolved
    pub rewired_callers: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole graph with the given files' elements.
    pub fn build(&mut self, files: Vec<(String, FileElements)>) -> BuildStats {
        *self = Self::new();

        let file_count = files.len();
        for (path, file) in files {
            self.files.entry(path).or_default();
            self.insert_file_elements(file);
        }

        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut unresolved = 0;
        for idx in nodes {
            unresolved += self.wire_calls(idx, None);
        }

        let stats = BuildStats {
            files: file_count,
            elements: self.element_count(),
            edges: self.edge_count(),
            heuristic_edges: self.heuristic_edge_count(),
            tests: self.tests.len(),
        };
        tracing::debug!(?stats, unresolved, "Dependency graph built");
        stats
    }

    /// Replace one file's elements.
    ///
    /// Removes every element of `path` together with every edge touching it,
    /// inserts `file`, resolves the new elements' calls and re-resolves calls in
    /// other files that name anything which appeared or disappeared here. The
    /// result equals what a full [`build`](Self::build) over the same inputs
    /// would produce, and calling it twice with the same input is a no-op the
    /// second time.
    pub fn update_file(&mut self, path: &str, file: FileElements) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();
        let mut touched_names: BTreeSet<String> = BTreeSet::new();

        let old_ids = self.files.remove(path).unwrap_or_default();
        for id in &old_ids {
            let Some(&idx) = self.id_to_node.get(id) else {
                continue;
            };
            let dependents: BTreeSet<ElementId> = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|n| &self.graph[n])
                .filter(|caller| caller.file_path != path)
                .map(|caller| caller.id.clone())
                .collect();
            if !dependents.is_empty() {
                outcome.former_dependents.insert(id.clone(), dependents);
            }
            if let Some(removed) = self.remove_element(idx) {
                touched_names.insert(removed.name().to_string());
                outcome.removed.push(removed.id);
            }
        }

        self.files.insert(path.to_string(), Vec::new());
        let inserted = self.insert_file_elements(file);
        for &idx in &inserted {
            let el = &self.graph[idx];
            touched_names.insert(el.name().to_string());
            outcome.inserted.push(el.id.clone());
        }

        for &idx in &inserted {
            self.wire_calls(idx, None);
        }

        let own_prefix = format!("{path}:");
        let callers: BTreeSet<ElementId> = touched_names
            .iter()
            .filter_map(|name| self.callers_by_name.get(name))
            .flatten()
            .filter(|id| !id.starts_with(&own_prefix))
            .cloned()
            .collect();
        for caller in &callers {
            if let Some(&idx) = self.id_to_node.get(caller) {
                self.rewire_calls(idx, &touched_names);
                outcome.rewired_callers += 1;
            }
        }

        // Removed ids that came straight back are not removals for callers
        outcome
            .former_dependents
            .retain(|id, _| !self.id_to_node.contains_key(id));

        tracing::debug!(
            path,
            removed = outcome.removed.len(),
            inserted = outcome.inserted.len(),
            rewired = outcome.rewired_callers,
            "Updated file in dependency graph"
        );
        outcome
    }

    /// Drop a file and everything it contributed.
    pub fn remove_file(&mut self, path: &str) -> UpdateOutcome {
        let outcome = self.update_file(path, FileElements::default());
        self.files.remove(path);
        outcome
    }

    /// Callees of `id`.
    pub fn dependencies(&self, id: &str) -> Result<BTreeSet<ElementId>, GraphError> {
        self.neighbor_ids(id, Direction::Outgoing)
    }

    /// Callers of `id`, read from the incrementally maintained reverse edges.
    pub fn dependents(&self, id: &str) -> Result<BTreeSet<ElementId>, GraphError> {
        self.neighbor_ids(id, Direction::Incoming)
    }

    fn neighbor_ids(&self, id: &str, dir: Direction) -> Result<BTreeSet<ElementId>, GraphError> {
        let idx = self
            .node_index(id)
            .ok_or_else(|| GraphError::ElementNotFound(id.to_string()))?;
        Ok(self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].id.clone())
            .collect())
    }

    /// Every element reachable from `changed` over reverse edges within
    /// `max_depth` hops (`None` = unbounded). The seeds are always included.
    pub fn test_impact(
        &self,
        changed: &[ElementId],
        max_depth: Option<usize>,
    ) -> BTreeSet<ElementId> {
        let seeds: Vec<(ElementId, usize)> = changed.iter().map(|id| (id.clone(), 0)).collect();
        self.impact_distances(&seeds, max_depth).into_keys().collect()
    }

    /// Minimum reverse-edge distance of every element reachable from the seeds.
    ///
    /// Seeds carry their own starting distance. Seeds unknown to the graph are
    /// reported at that distance but not expanded.
    pub fn impact_distances(
        &self,
        seeds: &[(ElementId, usize)],
        max_depth: Option<usize>,
    ) -> BTreeMap<ElementId, usize> {
        let mut dist: BTreeMap<ElementId, usize> = BTreeMap::new();
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();

        let mut sorted: Vec<&(ElementId, usize)> = seeds.iter().collect();
        sorted.sort_by_key(|(_, d)| *d);

        for (id, d) in sorted {
            if dist.get(id).is_some_and(|&known| known <= *d) {
                continue;
            }
            dist.insert(id.clone(), *d);
            if let Some(idx) = self.node_index(id) {
                queue.push_back((idx, *d));
            }
        }

        while let Some((current, depth)) = queue.pop_front() {
            if dist
                .get(&self.graph[current].id)
                .is_some_and(|&known| known < depth)
            {
                continue;
            }
            if max_depth.is_some_and(|limit| depth >= limit) {
                continue;
            }

            // Neighbor order is irrelevant: distances are minimised, not ordered
            for caller in self.graph.neighbors_directed(current, Direction::Incoming) {
                let caller_id = &self.graph[caller].id;
                let next = depth + 1;
                if dist.get(caller_id).is_some_and(|&known| known <= next) {
                    continue;
                }
                dist.insert(caller_id.clone(), next);
                queue.push_back((caller, next));
            }
        }

        dist
    }

    pub fn element(&self, id: &str) -> Option<&CodeElement> {
        self.node_index(id).map(|idx| &self.graph[idx])
    }

    pub fn elements(&self) -> impl Iterator<Item = &CodeElement> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    pub fn elements_in_file(&self, path: &str) -> Vec<&CodeElement> {
        self.files
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.element(id))
            .collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn test(&self, id: &str) -> Result<&TestRecord, GraphError> {
        self.tests
            .get(id)
            .ok_or_else(|| GraphError::TestNotFound(id.to_string()))
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestRecord> {
        self.tests.values()
    }

    /// Tests attached to any of the given elements, in element then ordinal order.
    pub fn tests_for<'a>(
        &'a self,
        ids: impl IntoIterator<Item = &'a ElementId>,
    ) -> Vec<&'a TestRecord> {
        ids.into_iter()
            .filter_map(|id| self.element(id))
            .flat_map(|el| el.attached_test_ids.iter())
            .filter_map(|tid| self.tests.get(tid))
            .collect()
    }

    pub fn element_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn heuristic_edge_count(&self) -> usize {
        self.graph
            .edge_indices()
            .filter(|&e| self.graph[e].resolution == Resolution::Heuristic)
            .count()
    }

    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Sorted node/edge lists for visualisation and comparisons.
    pub fn export(&self) -> GraphExport {
        let mut nodes: Vec<ExportNode> = self
            .elements()
            .map(|el| ExportNode {
                id: el.id.clone(),
                kind: el.kind,
                qualified_name: el.qualified_name.clone(),
                file_path: el.file_path.clone(),
                line_start: el.line_start,
                line_end: el.line_end,
                parent_id: el.parent_id.clone(),
                content_hash: el.content_hash.clone(),
                tests: el.attached_test_ids.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<ExportEdge> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (source, target) = self.graph.edge_endpoints(e)?;
                let w = &self.graph[e];
                Some(ExportEdge {
                    from: self.graph[source].id.clone(),
                    to: self.graph[target].id.clone(),
                    kind: w.kind,
                    resolution: w.resolution,
                    callee_name: w.callee_name.clone(),
                    site_line: w.site_line,
                })
            })
            .collect();
        edges.sort();

        GraphExport { nodes, edges }
    }

    /// Elements whose body calls something named `name`, resolved or not.
    pub fn referrers(&self, name: &str) -> BTreeSet<ElementId> {
        self.callers_by_name.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.id_to_node.get(id).copied()
    }

    pub(crate) fn node(&self, idx: NodeIndex) -> &CodeElement {
        &self.graph[idx]
    }

    pub(crate) fn methods_named(&self, name: &str) -> Option<&BTreeSet<ElementId>> {
        self.methods_by_name.get(name)
    }

    fn insert_file_elements(&mut self, file: FileElements) -> Vec<NodeIndex> {
        let mut inserted = Vec::with_capacity(file.elements.len());
        for el in file.elements {
            if self.id_to_node.contains_key(&el.id) {
                tracing::warn!(element = %el.id, "Element id already present, skipping");
                continue;
            }
            self.files
                .entry(el.file_path.clone())
                .or_default()
                .push(el.id.clone());
            if el.kind == ElementKind::Method {
                self.methods_by_name
                    .entry(el.name().to_string())
                    .or_default()
                    .insert(el.id.clone());
            }
            for call in &el.raw_calls {
                self.callers_by_name
                    .entry(call.callee_name().to_string())
                    .or_default()
                    .insert(el.id.clone());
            }
            let id = el.id.clone();
            let idx = self.graph.add_node(el);
            self.id_to_node.insert(id, idx);
            inserted.push(idx);
        }

        // Tests whose owner was skipped are dropped
        let owners: BTreeSet<&ElementId> = inserted.iter().map(|&idx| &self.graph[idx].id).collect();
        let tests: Vec<TestRecord> = file
            .tests
            .into_iter()
            .filter(|t| owners.contains(&t.owner_id))
            .collect();
        for test in tests {
            self.tests.insert(test.test_id.clone(), test);
        }
        inserted
    }

    fn remove_element(&mut self, idx: NodeIndex) -> Option<CodeElement> {
        let el = self.graph.remove_node(idx)?;
        self.id_to_node.remove(&el.id);

        if el.kind == ElementKind::Method
            && let Some(ids) = self.methods_by_name.get_mut(el.name())
        {
            ids.remove(&el.id);
            if ids.is_empty() {
                self.methods_by_name.remove(el.name());
            }
        }
        for call in &el.raw_calls {
            if let Some(ids) = self.callers_by_name.get_mut(call.callee_name()) {
                ids.remove(&el.id);
                if ids.is_empty() {
                    self.callers_by_name.remove(call.callee_name());
                }
            }
        }
        for tid in &el.attached_test_ids {
            self.tests.remove(tid);
        }
        Some(el)
    }

    /// Resolve and add edges for `idx`'s calls, optionally only those whose
    /// callee name is in `only`. Returns the number of unresolved calls.
    fn wire_calls(&mut self, idx: NodeIndex, only: Option<&BTreeSet<String>>) -> usize {
        let caller = &self.graph[idx];
        let mut unresolved = 0;
        let mut resolved: Vec<(NodeIndex, DependencyEdge)> = Vec::new();

        for call in &caller.raw_calls {
            let name = call.callee_name();
            if only.is_some_and(|names| !names.contains(name)) {
                continue;
            }
            match resolver::resolve(self, caller, name) {
                Some((target, resolution)) => {
                    resolved.push((target, DependencyEdge::call(name, call.line, resolution)))
                }
                None => unresolved += 1,
            }
        }

        for (target, edge) in resolved {
            self.graph.add_edge(idx, target, edge);
        }
        unresolved
    }

    fn rewire_calls(&mut self, idx: NodeIndex, names: &BTreeSet<String>) {
        let stale: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| names.contains(&e.weight().callee_name))
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        self.wire_calls(idx, Some(names));
    }
}

/// Serializable graph snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExportNode {
    pub id: ElementId,
    pub kind: ElementKind,
    pub qualified_name: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub parent_id: Option<ElementId>,
    pub content_hash: String,
    pub tests: Vec<TestId>,
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct ExportEdge {
    pub from: ElementId,
    pub to: ElementId,
    pub kind: EdgeKind,
    pub resolution: Resolution,
    pub callee_name: String,
    pub site_line: u32,
}

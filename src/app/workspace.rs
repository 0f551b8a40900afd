use crate::adapters::fs::FileSourceReader;
use crate::adapters::parser::{CommandParser, ParserRouter};
use crate::adapters::store::{JsonHistoryStore, JsonSnapshotStore, state_dir};
use crate::app::dto::*;
use crate::config::ImpactConfig;
use crate::domain::change::{ChangeDetector, ChangeSet};
use crate::domain::element::{ElementId, simple_name};
use crate::domain::feed::FileElements;
use crate::domain::graph::{DependencyGraph, GraphExport};
use crate::domain::history::ExecutionResult;
use crate::domain::ports::{HistoryStore, SnapshotStore, SourceParser, SourceReader};
use crate::domain::selector::{SelectionRequest, TestSelection, TestSelector};
use crate::domain::snapshot::FileSnapshot;
use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Everything known about one workspace root: the dependency graph, the
/// persisted snapshots and failure history, and the services acting on them.
///
/// A `Workspace` is a plain value with exclusive owners. To share it between
/// request handlers, move it into a [`WorkspaceHandle`](crate::app::actor::WorkspaceHandle).
pub struct Workspace {
    root: PathBuf,
    config: ImpactConfig,
    graph: DependencyGraph,
    detector: ChangeDetector,
    selector: TestSelector,
    snapshots: Box<dyn SnapshotStore>,
    history: Box<dyn HistoryStore>,
    /// Deleted element -> callers it had when it was removed
    departed: BTreeMap<ElementId, BTreeSet<ElementId>>,
}

impl Workspace {
    /// Open `root` with file-system reading, the configured parsers and JSON
    /// stores under the configured cache directory.
    pub fn open(root: &Path, config: ImpactConfig) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Workspace root not found: {}", root.display()))?;

        let parser: Arc<dyn SourceParser> = if config.parser.command.is_empty() {
            Arc::new(ParserRouter::new())
        } else {
            let command =
                CommandParser::new(&config.parser.command, &config.parser.command_extensions, &root)?;
            Arc::new(ParserRouter::with_command(command))
        };

        let dir = state_dir(&config.cache_dir(&root), &root);
        tracing::info!(root = %root.display(), state = %dir.display(), "Opening workspace");
        let snapshots = Box::new(JsonSnapshotStore::open(&dir));
        let history = Box::new(JsonHistoryStore::open(&dir));

        Ok(Self::new(
            root,
            config,
            Arc::new(FileSourceReader::new()),
            parser,
            snapshots,
            history,
        ))
    }

    /// Assemble a workspace from explicit collaborators.
    pub fn new(
        root: PathBuf,
        config: ImpactConfig,
        reader: Arc<dyn SourceReader>,
        parser: Arc<dyn SourceParser>,
        snapshots: Box<dyn SnapshotStore>,
        history: Box<dyn HistoryStore>,
    ) -> Self {
        let detector = ChangeDetector::new(root.clone(), reader, parser, config.hasher.mode);
        let selector = TestSelector::new(config.selector_params());
        Self {
            root,
            config,
            graph: DependencyGraph::new(),
            detector,
            selector,
            snapshots,
            history,
            departed: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            root: self.root.display().to_string(),
            cache_dir: self.config.cache_dir(&self.root).display().to_string(),
            hash_mode: format!("{:?}", self.config.hasher.mode).to_lowercase(),
            file_count: self.graph.files().count(),
            element_count: self.graph.element_count(),
            edge_count: self.graph.edge_count(),
            heuristic_edge_count: self.graph.heuristic_edge_count(),
            test_count: self.graph.test_count(),
            tracked_test_count: self.history.history().len(),
        }
    }

    /// Workspace-relative, `/`-separated paths of every file a parser handles,
    /// honouring `.gitignore` and the configured exclusions. Sorted.
    pub fn scan_files(&self) -> Result<Vec<String>> {
        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.config.workspace.exclude {
            overrides
                .add(&format!("!{pattern}"))
                .with_context(|| format!("Invalid exclude pattern: {pattern}"))?;
        }
        let overrides = overrides.build().context("Invalid exclude patterns")?;

        let extensions = self.config.scanned_extensions();
        let mut files = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .git_ignore(true)
            .require_git(false)
            .follow_links(false)
            .overrides(overrides)
            .build();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let wanted = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e == ext));
            if !wanted {
                continue;
            }
            if let Some(rel) = relative_to(&self.root, path)
                && self.detector.supports(&rel)
            {
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Rebuild the graph from every file in the workspace and overwrite all
    /// snapshots.
    pub fn build_graph(&mut self) -> Result<BuildResponse> {
        let (response, snapshots) = self.rebuild()?;
        self.snapshots.clear();
        for snapshot in snapshots {
            self.snapshots.save(snapshot);
        }
        self.snapshots.flush()?;
        Ok(response)
    }

    /// Rebuild the graph from the current sources but keep the stored
    /// snapshots, so a later [`detect_changes`](Self::detect_changes) still
    /// diffs against the last known-good state.
    pub fn load_graph(&mut self) -> Result<BuildResponse> {
        let (response, _) = self.rebuild()?;
        Ok(response)
    }

    /// Load against the stored snapshots, or build a fresh baseline when there
    /// are none yet.
    pub fn start(&mut self) -> Result<BuildResponse> {
        if self.snapshots.is_empty() {
            self.build_graph()
        } else {
            self.load_graph()
        }
    }

    fn rebuild(&mut self) -> Result<(BuildResponse, Vec<FileSnapshot>)> {
        self.departed.clear();
        let paths = self.scan_files()?;
        let mut files = Vec::with_capacity(paths.len());
        let mut snapshots = Vec::with_capacity(paths.len());
        let mut parse_failures = Vec::new();

        for path in paths {
            let (source, whole_hash) = match self.detector.read_file(&path) {
                Ok(read) => read,
                Err(e) => {
                    tracing::warn!(path, error = %format!("{e:#}"), "Skipping unreadable file");
                    continue;
                }
            };
            let (file, failed) = self.detector.parse_file(&path, &source);
            if failed {
                parse_failures.push(path.clone());
            }
            snapshots.push(snapshot_of(&path, whole_hash, &file));
            files.push((path, file));
        }

        let stats = self.graph.build(files);
        tracing::info!(
            files = stats.files,
            elements = stats.elements,
            edges = stats.edges,
            tests = stats.tests,
            "Built dependency graph"
        );
        let response = BuildResponse {
            stats,
            parse_failures,
        };
        Ok((response, snapshots))
    }

    /// Reparse one file unconditionally and replace its elements.
    pub fn update_file(&mut self, path: &str) -> Result<UpdateFileResponse> {
        let path = self.relative_path(path)?;
        let (outcome, parse_failed) = match self.detector.read_file(&path) {
            Ok((source, whole_hash)) => {
                let (file, failed) = self.detector.parse_file(&path, &source);
                self.snapshots.save(snapshot_of(&path, whole_hash, &file));
                (self.graph.update_file(&path, file), failed)
            }
            Err(e) => {
                tracing::debug!(path, error = %e, "File unreadable, removing it");
                self.snapshots.remove(&path);
                (self.graph.remove_file(&path), false)
            }
        };
        self.snapshots.flush()?;
        self.remember_departed(&outcome.former_dependents, &outcome.inserted);

        Ok(UpdateFileResponse {
            path,
            removed: outcome.removed,
            inserted: outcome.inserted,
            rewired_callers: outcome.rewired_callers,
            parse_failed,
        })
    }

    /// Diff one file against its snapshot and bring the graph up to date.
    pub fn detect_changes(&mut self, path: &str) -> Result<ChangeSet> {
        let path = self.relative_path(path)?;
        let known: BTreeSet<ElementId> = self
            .graph
            .elements_in_file(&path)
            .into_iter()
            .map(|el| el.id.clone())
            .collect();
        let mut changes = self
            .detector
            .detect_changes(&mut self.graph, self.snapshots.as_mut(), &path);
        self.snapshots.flush()?;

        // Deleted before the graph was loaded: the edges are gone, so fall
        // back to everything that still names the element.
        for id in &changes.deleted {
            if known.contains(id) || changes.former_dependents.contains_key(id) {
                continue;
            }
            let referrers: BTreeSet<ElementId> = self
                .graph
                .referrers(element_name(id))
                .into_iter()
                .filter(|caller| caller != id)
                .collect();
            if !referrers.is_empty() {
                changes.former_dependents.insert(id.clone(), referrers);
            }
        }
        self.remember_departed(&changes.former_dependents, &changes.added);
        Ok(changes)
    }

    /// Every event is diffed against the file's snapshot first. Structural
    /// events, and modifications of a file that had no elements, then reload
    /// the whole graph while keeping the other files' snapshots.
    pub fn handle_file_event(&mut self, event: FileEvent) -> Result<FileEventResponse> {
        let path = self.relative_path(&event.path)?;
        tracing::debug!(path, kind = ?event.kind, "File event");

        let structural = event.kind != FileEventKind::Modified
            || self.graph.elements_in_file(&path).is_empty();
        let changes = self.detect_changes(&path)?;
        let rebuild = if structural {
            let stats = self.load_graph()?.stats;
            self.remember_departed(&changes.former_dependents, &changes.added);
            Some(stats)
        } else {
            None
        };
        Ok(FileEventResponse {
            path,
            kind: event.kind,
            rebuild,
            changes,
        })
    }

    pub fn dependencies(&self, id: &str) -> Result<NeighborsResponse> {
        Ok(NeighborsResponse {
            id: id.to_string(),
            elements: self.graph.dependencies(id)?.into_iter().collect(),
        })
    }

    pub fn dependents(&self, id: &str) -> Result<NeighborsResponse> {
        Ok(NeighborsResponse {
            id: id.to_string(),
            elements: self.graph.dependents(id)?.into_iter().collect(),
        })
    }

    pub fn test_impact(&self, req: &ImpactRequest) -> ImpactResponse {
        let impacted = self.graph.test_impact(&req.ids, req.max_depth);
        let tests = self
            .graph
            .tests_for(impacted.iter())
            .into_iter()
            .cloned()
            .collect();
        ImpactResponse {
            impacted: impacted.into_iter().collect(),
            tests,
        }
    }

    /// Rank and select tests for a set of changed elements.
    ///
    /// Changed ids that were deleted earlier in this session pull in their
    /// former callers one hop out.
    pub fn select(&self, req: &SelectRequest) -> TestSelection {
        let adjacent: BTreeSet<ElementId> = req
            .changed
            .iter()
            .filter_map(|id| self.departed.get(id))
            .flatten()
            .cloned()
            .collect();
        let request = SelectionRequest::new(req.changed.clone())
            .with_adjacent(adjacent.into_iter().collect())
            .with_budget(req.time_budget_ms)
            .with_threshold(
                req.confidence_threshold
                    .unwrap_or(self.config.selector.confidence_threshold),
            );
        self.selector
            .select(&self.graph, self.history.history(), &request, Utc::now())
    }

    /// Detect changes in `paths` (every known and scanned file when empty) and
    /// select tests for everything that changed.
    pub fn affected(&mut self, req: &AffectedRequest) -> Result<AffectedResponse> {
        let paths: Vec<String> = if req.paths.is_empty() {
            let mut all: BTreeSet<String> = self.scan_files()?.into_iter().collect();
            all.extend(self.graph.files().map(str::to_string));
            all.into_iter().collect()
        } else {
            req.paths.clone()
        };

        let mut changes = Vec::new();
        for path in &paths {
            let set = self.detect_changes(path)?;
            if !set.is_empty() {
                changes.push(set);
            }
        }

        let changed: Vec<ElementId> = changes.iter().flat_map(ChangeSet::changed).collect();
        let selection = self.select(&SelectRequest {
            changed,
            time_budget_ms: req.time_budget_ms,
            confidence_threshold: req.confidence_threshold,
        });
        Ok(AffectedResponse { changes, selection })
    }

    pub fn record_results(&mut self, results: &[ExecutionResult]) -> Result<RecordResponse> {
        for result in results {
            self.history.record(result);
        }
        self.history.flush()?;
        tracing::debug!(recorded = results.len(), "Recorded test results");
        Ok(RecordResponse {
            recorded: results.len(),
            tracked_test_count: self.history.history().len(),
        })
    }

    pub fn export(&self) -> GraphExport {
        self.graph.export()
    }

    /// Flush both stores.
    pub fn close(&mut self) -> Result<()> {
        self.snapshots.flush()?;
        self.history.flush()?;
        tracing::debug!(root = %self.root.display(), "Workspace closed");
        Ok(())
    }

    fn remember_departed(
        &mut self,
        former: &BTreeMap<ElementId, BTreeSet<ElementId>>,
        reappeared: &[ElementId],
    ) {
        for id in reappeared {
            self.departed.remove(id);
        }
        for (id, callers) in former {
            self.departed
                .entry(id.clone())
                .or_default()
                .extend(callers.iter().cloned());
        }
    }

    /// Normalise a path given by a caller to the workspace-relative form used
    /// in element ids.
    pub fn relative_path(&self, path: &str) -> Result<String> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return match relative_to(&self.root, candidate) {
                Some(rel) => Ok(rel),
                None => bail!("Path is outside the workspace: {path}"),
            };
        }
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            bail!("Path is outside the workspace: {path}");
        }
        Ok(path.trim_start_matches("./").replace('\\', "/"))
    }
}

fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Simple name of the element an id refers to (`a.py:K.go` -> `go`).
fn element_name(id: &str) -> &str {
    simple_name(id.rsplit_once(':').map_or(id, |(_, qualified)| qualified))
}

fn snapshot_of(path: &str, whole_hash: String, file: &FileElements) -> FileSnapshot {
    let hashes = file
        .elements
        .iter()
        .map(|el| (el.id.clone(), el.content_hash.clone()))
        .collect();
    FileSnapshot::new(path, whole_hash, hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::parser::PythonOutlineParser;
    use crate::adapters::store::{MemoryHistoryStore, MemorySnapshotStore};

    fn workspace(dir: &Path) -> Workspace {
        Workspace::new(
            dir.to_path_buf(),
            ImpactConfig::default(),
            Arc::new(FileSourceReader::new()),
            Arc::new(PythonOutlineParser::new()),
            Box::new(MemorySnapshotStore::new()),
            Box::new(MemoryHistoryStore::new()),
        )
    }

    #[test]
    fn test_scan_honours_extensions_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::create_dir_all(root.join("venv/lib")).unwrap();
        std::fs::write(root.join("pkg/a.py"), "def a():\n    pass\n").unwrap();
        std::fs::write(root.join("b.py"), "def b():\n    pass\n").unwrap();
        std::fs::write(root.join("notes.txt"), "x").unwrap();
        std::fs::write(root.join("venv/lib/c.py"), "def c():\n    pass\n").unwrap();

        let ws = workspace(root);
        assert_eq!(ws.scan_files().unwrap(), vec!["b.py", "pkg/a.py"]);
    }

    #[test]
    fn test_relative_path_normalisation() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        assert_eq!(ws.relative_path("./pkg/a.py").unwrap(), "pkg/a.py");
        let abs = dir.path().join("pkg").join("a.py");
        assert_eq!(ws.relative_path(abs.to_str().unwrap()).unwrap(), "pkg/a.py");
        assert!(ws.relative_path("../escape.py").is_err());
        assert!(ws.relative_path("/elsewhere/x.py").is_err());
    }

    #[test]
    fn test_modified_event_for_unknown_file_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    pass\n").unwrap();
        let mut ws = workspace(dir.path());

        let res = ws
            .handle_file_event(FileEvent {
                path: "a.py".into(),
                kind: FileEventKind::Modified,
                timestamp: None,
            })
            .unwrap();
        assert!(res.rebuild.is_some());
        assert_eq!(ws.graph().element_count(), 1);

        std::fs::write(dir.path().join("a.py"), "def a():\n    return 1\n").unwrap();
        let res = ws
            .handle_file_event(FileEvent {
                path: "a.py".into(),
                kind: FileEventKind::Modified,
                timestamp: None,
            })
            .unwrap();
        assert!(res.rebuild.is_none());
        assert_eq!(res.changes.modified, vec!["a.py:a".to_string()]);
    }

    fn event(path: &str, kind: FileEventKind) -> FileEvent {
        FileEvent {
            path: path.into(),
            kind,
            timestamp: None,
        }
    }

    fn lib_and_app(root: &Path) {
        std::fs::write(root.join("lib.py"), "class K:\n    def go(self):\n        pass\n").unwrap();
        std::fs::write(
            root.join("app.py"),
            "def run(k):\n    \"\"\"\n    >>> run(None)\n    \"\"\"\n    return k.go()\n",
        )
        .unwrap();
    }

    fn select_all(changed: &[&str]) -> SelectRequest {
        SelectRequest {
            changed: changed.iter().map(|id| id.to_string()).collect(),
            time_budget_ms: None,
            confidence_threshold: Some(0.0),
        }
    }

    #[test]
    fn test_modified_event_for_file_without_elements_reloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let mut ws = workspace(dir.path());
        ws.build_graph().unwrap();
        assert_eq!(ws.graph().element_count(), 0);

        std::fs::write(dir.path().join("a.py"), "x = 1\n\ndef f():\n    return x\n").unwrap();
        let res = ws.handle_file_event(event("a.py", FileEventKind::Modified)).unwrap();
        assert!(res.rebuild.is_some());
        assert_eq!(res.changes.added, vec!["a.py:f".to_string()]);
        assert!(ws.graph().element("a.py:f").is_some());
    }

    #[test]
    fn test_deleted_file_event_reports_elements_and_seeds_callers() {
        let dir = tempfile::tempdir().unwrap();
        lib_and_app(dir.path());
        std::fs::write(dir.path().join("other.py"), "def o():\n    pass\n").unwrap();
        let mut ws = workspace(dir.path());
        ws.build_graph().unwrap();

        std::fs::write(dir.path().join("other.py"), "def o():\n    return 1\n").unwrap();
        std::fs::remove_file(dir.path().join("lib.py")).unwrap();
        let res = ws.handle_file_event(event("lib.py", FileEventKind::Deleted)).unwrap();
        assert!(res.rebuild.is_some());
        assert!(res.changes.deleted.contains(&"lib.py:K.go".to_string()));
        assert_eq!(
            res.changes.former_dependents.get("lib.py:K.go"),
            Some(&BTreeSet::from(["app.py:run".to_string()]))
        );
        assert!(!ws.graph().has_file("lib.py"));

        let selection = ws.select(&select_all(&["lib.py:K.go"]));
        assert_eq!(selection.get("app.py:run#0").unwrap().distance, Some(1));

        // The reload keeps other files' snapshots, so their pending edits still show.
        let other = ws.detect_changes("other.py").unwrap();
        assert_eq!(other.modified, vec!["other.py:o".to_string()]);
    }

    #[test]
    fn test_created_file_event_reports_added_elements() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "def run():\n    return helper()\n").unwrap();
        let mut ws = workspace(dir.path());
        ws.build_graph().unwrap();
        assert!(ws.dependencies("app.py:run").unwrap().elements.is_empty());

        std::fs::write(dir.path().join("app.py"), "def run():\n    return helper()\n\ndef helper():\n    return 0\n").unwrap();
        std::fs::write(dir.path().join("new.py"), "def fresh():\n    return 1\n").unwrap();
        let res = ws.handle_file_event(event("new.py", FileEventKind::Created)).unwrap();
        assert!(res.rebuild.is_some());
        assert_eq!(res.changes.added, vec!["new.py:fresh".to_string()]);
        assert!(ws.graph().element("new.py:fresh").is_some());

        let app = ws.detect_changes("app.py").unwrap();
        assert_eq!(app.added, vec!["app.py:helper".to_string()]);
    }

    #[test]
    fn test_start_keeps_baseline_from_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    pass\n").unwrap();
        let open = |root: &Path| {
            Workspace::new(
                root.to_path_buf(),
                ImpactConfig::default(),
                Arc::new(FileSourceReader::new()),
                Arc::new(PythonOutlineParser::new()),
                Box::new(JsonSnapshotStore::open(state.path())),
                Box::new(MemoryHistoryStore::new()),
            )
        };

        let mut first = open(dir.path());
        assert_eq!(first.start().unwrap().stats.elements, 1);
        first.close().unwrap();

        std::fs::write(dir.path().join("a.py"), "def a():\n    return 1\n").unwrap();
        let mut second = open(dir.path());
        second.start().unwrap();
        let changes = second.detect_changes("a.py").unwrap();
        assert!(!changes.skipped);
        assert_eq!(changes.modified, vec!["a.py:a".to_string()]);
    }

    #[test]
    fn test_rebuild_forgets_departed_callers() {
        let dir = tempfile::tempdir().unwrap();
        lib_and_app(dir.path());
        let mut ws = workspace(dir.path());
        ws.build_graph().unwrap();

        std::fs::write(dir.path().join("lib.py"), "class K:\n    pass\n").unwrap();
        ws.detect_changes("lib.py").unwrap();
        assert!(ws.select(&select_all(&["lib.py:K.go"])).contains("app.py:run#0"));

        ws.build_graph().unwrap();
        assert!(!ws.select(&select_all(&["lib.py:K.go"])).contains("app.py:run#0"));
    }

    #[test]
    fn test_deleted_element_seeds_former_callers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.py"), "class K:\n    def go(self):\n        pass\n").unwrap();
        std::fs::write(
            dir.path().join("app.py"),
            "def run(k):\n    \"\"\"\n    >>> run(None)\n    \"\"\"\n    return k.go()\n",
        )
        .unwrap();
        let mut ws = workspace(dir.path());
        ws.build_graph().unwrap();
        assert_eq!(
            ws.dependents("lib.py:K.go").unwrap().elements,
            vec!["app.py:run".to_string()]
        );

        std::fs::write(dir.path().join("lib.py"), "class K:\n    pass\n").unwrap();
        let res = ws.affected(&AffectedRequest::default()).unwrap();
        assert_eq!(res.changes.len(), 1);
        assert!(res.changes[0].deleted.contains(&"lib.py:K.go".to_string()));

        let run_test = res.selection.get("app.py:run#0").unwrap();
        assert_eq!(run_test.distance, Some(1));
    }
}

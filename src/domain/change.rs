use crate::domain::element::ElementId;
use crate::domain::feed::FileElements;
use crate::domain::graph::DependencyGraph;
use crate::domain::hasher::{HashMode, file_hash};
use crate::domain::ports::{SnapshotStore, SourceParser, SourceReader};
use crate::domain::snapshot::FileSnapshot;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Element-level difference between a file's snapshot and its current content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChangeSet {
    pub path: String,
    pub added: Vec<ElementId>,
    pub modified: Vec<ElementId>,
    pub deleted: Vec<ElementId>,
    /// Callers each deleted element had right before it was removed
    #[serde(default)]
    pub former_dependents: BTreeMap<ElementId, BTreeSet<ElementId>>,
    /// Whole-file hash matched the snapshot; nothing was parsed
    #[serde(default)]
    pub skipped: bool,
    /// The parser failed; the file now contributes zero elements
    #[serde(default)]
    pub parse_failed: bool,
    /// A usable snapshot existed before this run
    #[serde(default)]
    pub had_prior_state: bool,
}

impl ChangeSet {
    fn unchanged(path: &str) -> Self {
        Self {
            path: path.to_string(),
            skipped: true,
            had_prior_state: true,
            ..Default::default()
        }
    }

    /// Added, modified and deleted ids, in that order.
    pub fn changed(&self) -> Vec<ElementId> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Change Detector - compares a file against its persisted snapshot and keeps
/// graph and snapshot in step.
pub struct ChangeDetector {
    root: PathBuf,
    reader: Arc<dyn SourceReader>,
    parser: Arc<dyn SourceParser>,
    hash_mode: HashMode,
}

impl ChangeDetector {
    pub fn new(
        root: impl Into<PathBuf>,
        reader: Arc<dyn SourceReader>,
        parser: Arc<dyn SourceParser>,
        hash_mode: HashMode,
    ) -> Self {
        Self {
            root: root.into(),
            reader,
            parser,
            hash_mode,
        }
    }

    pub fn supports(&self, path: &str) -> bool {
        self.parser.supports(path)
    }

    /// Read and parse one file. A parse failure is logged and yields no
    /// elements; the second value reports whether that happened.
    pub fn parse_file(&self, path: &str, source: &str) -> (FileElements, bool) {
        match self.parser.parse(path, source) {
            Ok(parsed) => (FileElements::from_feed(path, parsed, self.hash_mode), false),
            Err(e) => {
                tracing::warn!(path, error = %format!("{e:#}"), "Parse failed, file contributes no elements");
                (FileElements::default(), true)
            }
        }
    }

    /// Read a workspace-relative file, returning its text and whole-file hash.
    pub fn read_file(&self, path: &str) -> anyhow::Result<(String, String)> {
        let source = self.reader.read(&self.root.join(path))?;
        let hash = file_hash(source.as_bytes());
        Ok((source, hash))
    }

    /// Classify `path`'s elements as added / modified / deleted since the last
    /// snapshot, update the graph to match and overwrite the snapshot.
    pub fn detect_changes(
        &self,
        graph: &mut DependencyGraph,
        snapshots: &mut dyn SnapshotStore,
        path: &str,
    ) -> ChangeSet {
        let previous = snapshots.load(path);

        let (source, whole_hash) = match self.read_file(path) {
            Ok(read) => read,
            Err(e) => {
                tracing::debug!(path, error = %e, "File unreadable, treating as deleted");
                return self.file_gone(graph, snapshots, path, previous);
            }
        };

        if let Some(prev) = &previous
            && prev.whole_file_hash == whole_hash
        {
            return ChangeSet::unchanged(path);
        }

        let (file, parse_failed) = self.parse_file(path, &source);
        let new_hashes: BTreeMap<ElementId, String> = file
            .elements
            .iter()
            .map(|el| (el.id.clone(), el.content_hash.clone()))
            .collect();
        let had_prior_state = previous.is_some();
        let old_hashes = previous.map(|p| p.element_hashes).unwrap_or_default();

        let mut changes = ChangeSet {
            path: path.to_string(),
            parse_failed,
            had_prior_state,
            ..Default::default()
        };
        for (id, hash) in &new_hashes {
            match old_hashes.get(id) {
                None => changes.added.push(id.clone()),
                Some(old) if old != hash => changes.modified.push(id.clone()),
                Some(_) => {}
            }
        }
        changes.deleted = old_hashes
            .keys()
            .filter(|id| !new_hashes.contains_key(*id))
            .cloned()
            .collect();

        let outcome = graph.update_file(path, file);
        changes.former_dependents = outcome
            .former_dependents
            .into_iter()
            .filter(|(id, _)| changes.deleted.contains(id))
            .collect();

        snapshots.save(FileSnapshot::new(path, whole_hash, new_hashes));

        tracing::debug!(
            path,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "Detected changes"
        );
        changes
    }

    fn file_gone(
        &self,
        graph: &mut DependencyGraph,
        snapshots: &mut dyn SnapshotStore,
        path: &str,
        previous: Option<FileSnapshot>,
    ) -> ChangeSet {
        let had_prior_state = previous.is_some();
        let deleted: Vec<ElementId> = match previous {
            Some(prev) => prev.element_hashes.into_keys().collect(),
            None => graph
                .elements_in_file(path)
                .into_iter()
                .map(|el| el.id.clone())
                .collect(),
        };

        let outcome = graph.remove_file(path);
        snapshots.remove(path);

        ChangeSet {
            path: path.to_string(),
            former_dependents: outcome
                .former_dependents
                .into_iter()
                .filter(|(id, _)| deleted.contains(id))
                .collect(),
            deleted,
            had_prior_state,
            ..Default::default()
        }
    }
}

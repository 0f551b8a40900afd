use crate::domain::history::{ExecutionResult, FailureHistory};
use crate::domain::ports::{HistoryStore, SnapshotStore};
use crate::domain::snapshot::FileSnapshot;
use anyhow::Result;
use std::collections::HashMap;

/// Snapshot store that lives only as long as the workspace
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: HashMap<String, FileSnapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, path: &str) -> Option<FileSnapshot> {
        self.snapshots.get(path).cloned()
    }

    fn save(&mut self, snapshot: FileSnapshot) {
        self.snapshots.insert(snapshot.file_path.clone(), snapshot);
    }

    fn remove(&mut self, path: &str) {
        self.snapshots.remove(path);
    }

    fn clear(&mut self) {
        self.snapshots.clear();
    }

    fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    history: FailureHistory,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: FailureHistory) -> Self {
        Self { history }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn history(&self) -> &FailureHistory {
        &self.history
    }

    fn record(&mut self, result: &ExecutionResult) {
        self.history.record(result);
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

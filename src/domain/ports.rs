use crate::domain::feed::ParsedElement;
use crate::domain::history::{ExecutionResult, FailureHistory};
use crate::domain::snapshot::FileSnapshot;
use anyhow::Result;
use std::path::Path;

/// Source code reader port
pub trait SourceReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<String>;
}

/// Source parser port (implemented by language adapters)
pub trait SourceParser: Send + Sync {
    /// Whether this parser handles the given workspace-relative path
    fn supports(&self, path: &str) -> bool;

    /// Extract elements, call names and attached tests from one file
    fn parse(&self, path: &str, source: &str) -> Result<Vec<ParsedElement>>;
}

/// Persisted per-file snapshots
pub trait SnapshotStore: Send {
    /// Stored snapshot, or `None` when absent or unreadable
    fn load(&self, path: &str) -> Option<FileSnapshot>;
    fn save(&mut self, snapshot: FileSnapshot);
    fn remove(&mut self, path: &str);
    fn clear(&mut self);
    fn is_empty(&self) -> bool;
    fn flush(&mut self) -> Result<()>;
}

/// Persisted failure history
pub trait HistoryStore: Send {
    fn history(&self) -> &FailureHistory;
    fn record(&mut self, result: &ExecutionResult);
    fn flush(&mut self) -> Result<()>;
}

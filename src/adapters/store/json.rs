use crate::domain::history::{ExecutionResult, FailureHistory};
use crate::domain::ports::{HistoryStore, SnapshotStore};
use crate::domain::snapshot::FileSnapshot;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOTS_FILE: &str = "snapshots.json";
pub const HISTORY_FILE: &str = "history.json";

const KEY_LEN: usize = 16;

/// Stable directory name for a workspace root: a SHA-256 prefix of its
/// canonical path.
pub fn workspace_key(root: &Path) -> String {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(KEY_LEN);
    key
}

/// `<cache_dir>/<workspace key>`
pub fn state_dir(cache_dir: &Path, root: &Path) -> PathBuf {
    cache_dir.join(workspace_key(root))
}

/// Read a JSON state file. Missing means empty; unreadable or malformed is
/// logged and also treated as empty.
fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable state file, starting empty");
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt state file discarded, starting empty");
            T::default()
        }
    }
}

/// Replace `path` atomically with the JSON encoding of `value`.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value).context("Failed to encode state")?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write state file: {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Default, Serialize, serde::Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    files: BTreeMap<String, FileSnapshot>,
}

/// File snapshots persisted as one JSON document
#[derive(Debug)]
pub struct JsonSnapshotStore {
    path: PathBuf,
    state: SnapshotFile,
    dirty: bool,
}

impl JsonSnapshotStore {
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(SNAPSHOTS_FILE);
        let state: SnapshotFile = load_or_default(&path);
        tracing::debug!(path = %path.display(), files = state.files.len(), "Loaded snapshots");
        Self {
            path,
            state,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.state.files.len()
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self, path: &str) -> Option<FileSnapshot> {
        self.state.files.get(path).cloned()
    }

    fn save(&mut self, snapshot: FileSnapshot) {
        self.state.files.insert(snapshot.file_path.clone(), snapshot);
        self.dirty = true;
    }

    fn remove(&mut self, path: &str) {
        self.dirty |= self.state.files.remove(path).is_some();
    }

    fn clear(&mut self) {
        self.dirty |= !self.state.files.is_empty();
        self.state.files.clear();
    }

    fn is_empty(&self) -> bool {
        self.state.files.is_empty()
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        write_atomic(&self.path, &self.state)?;
        self.dirty = false;
        Ok(())
    }
}

/// Failure history persisted as one JSON document
#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    history: FailureHistory,
    dirty: bool,
}

impl JsonHistoryStore {
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(HISTORY_FILE);
        let history: FailureHistory = load_or_default(&path);
        tracing::debug!(path = %path.display(), tests = history.len(), "Loaded failure history");
        Self {
            path,
            history,
            dirty: false,
        }
    }
}

impl HistoryStore for JsonHistoryStore {
    fn history(&self) -> &FailureHistory {
        &self.history
    }

    fn record(&mut self, result: &ExecutionResult) {
        self.history.record(result);
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        write_atomic(&self.path, &self.history)?;
        self.dirty = false;
        Ok(())
    }
}

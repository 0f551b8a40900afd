//! Persistence adapters for snapshots and failure history.

mod json;
mod memory;

pub use json::{
    HISTORY_FILE, JsonHistoryStore, JsonSnapshotStore, SNAPSHOTS_FILE, state_dir, workspace_key,
};
pub use memory::{MemoryHistoryStore, MemorySnapshotStore};

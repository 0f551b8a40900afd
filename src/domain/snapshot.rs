use crate::domain::element::ElementId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last known-good state of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub file_path: String,
    /// Hash of the raw file bytes; equal hashes skip reparsing entirely
    pub whole_file_hash: String,
    #[serde(default)]
    pub element_hashes: BTreeMap<ElementId, String>,
    pub captured_at: DateTime<Utc>,
}

impl FileSnapshot {
    pub fn new(
        file_path: impl Into<String>,
        whole_file_hash: impl Into<String>,
        element_hashes: BTreeMap<ElementId, String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            whole_file_hash: whole_file_hash.into(),
            element_hashes,
            captured_at: Utc::now(),
        }
    }
}

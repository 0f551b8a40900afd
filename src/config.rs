//! Workspace configuration, read from `.timpact.toml` at the workspace root.
//!
//! Every section and field is optional; a missing file yields the defaults.

use crate::domain::hasher::HashMode;
use crate::domain::selector::{DEFAULT_CONFIDENCE_THRESHOLD, SelectorParams};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = ".timpact.toml";
pub const DEFAULT_CACHE_DIR: &str = ".timpact-cache";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub hasher: HasherSection,
    #[serde(default)]
    pub selector: SelectorSection,
    #[serde(default)]
    pub parser: ParserSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    /// Where persisted state lives; relative paths resolve against the root
    pub cache_dir: PathBuf,
    /// File extensions scanned by a full build (without the dot)
    pub extensions: Vec<String>,
    /// Glob patterns skipped by a full build, relative to the root
    pub exclude: Vec<String>,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            extensions: vec!["py".into()],
            exclude: vec![
                "**/__pycache__/**".into(),
                "**/venv/**".into(),
                "**/node_modules/**".into(),
                "**/target/**".into(),
                "**/build/**".into(),
                "**/dist/**".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasherSection {
    pub mode: HashMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub max_depth: usize,
    pub confidence_threshold: f64,
    pub recent_failure_hours: i64,
    pub default_duration_ms: u64,
}

impl Default for SelectorSection {
    fn default() -> Self {
        let params = SelectorParams::default();
        Self {
            max_depth: params.max_depth,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            recent_failure_hours: params.recent_failure_window.num_hours(),
            default_duration_ms: params.default_duration_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSection {
    /// External parser program and fixed arguments; empty disables it
    pub command: Vec<String>,
    /// Extensions routed to the external parser
    pub command_extensions: Vec<String>,
}

impl ImpactConfig {
    /// Load `<root>/.timpact.toml`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        if self.workspace.cache_dir.is_absolute() {
            self.workspace.cache_dir.clone()
        } else {
            root.join(&self.workspace.cache_dir)
        }
    }

    pub fn selector_params(&self) -> SelectorParams {
        SelectorParams {
            max_depth: self.selector.max_depth,
            recent_failure_window: chrono::Duration::hours(self.selector.recent_failure_hours),
            default_duration_ms: self.selector.default_duration_ms,
        }
    }

    /// Extensions that any configured parser handles.
    pub fn scanned_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self
            .workspace
            .extensions
            .iter()
            .chain(self.parser.command_extensions.iter())
            .map(|e| e.trim_start_matches('.').to_string())
            .collect();
        exts.sort();
        exts.dedup();
        exts
    }
}

//! Content fingerprints for elements and whole files.
//!
//! Element bodies are normalised before hashing so that blank lines, comment-only
//! lines and re-indentation of the whole body do not register as edits. The
//! `Exact` mode skips normalisation for callers that consider that trade-off
//! unacceptable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Line prefixes treated as comment-only lines.
const COMMENT_PREFIXES: [&str; 2] = ["#", "//"];

/// Indentation marker emitted once per nesting level.
const INDENT_MARKER: char = '\t';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMode {
    /// Ignore blank/comment lines and proportional re-indentation
    #[default]
    Normalized,
    /// Hash the raw body text
    Exact,
}

/// Hash an element body.
pub fn content_hash(body: &str, mode: HashMode) -> String {
    match mode {
        HashMode::Normalized => sha256_hex(normalize(body).as_bytes()),
        HashMode::Exact => sha256_hex(body.as_bytes()),
    }
}

/// Hash raw file bytes for the unchanged-file pre-check.
pub fn file_hash(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Normalised body text: one line per significant source line, leading
/// whitespace replaced by relative nesting markers.
pub fn normalize(body: &str) -> String {
    let lines: Vec<(usize, &str)> = body
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || is_comment_only(trimmed) {
                return None;
            }
            Some((indent_width(line), trimmed))
        })
        .collect();

    let Some(base) = lines.iter().map(|(w, _)| *w).min() else {
        return String::new();
    };
    let unit = lines
        .iter()
        .map(|(w, _)| w - base)
        .filter(|&rel| rel > 0)
        .min()
        .unwrap_or(1);

    let mut out = String::new();
    for (width, text) in lines {
        let level = (width - base).div_ceil(unit);
        out.extend(std::iter::repeat_n(INDENT_MARKER, level));
        out.push_str(text);
        out.push('\n');
    }
    out
}

fn is_comment_only(trimmed: &str) -> bool {
    COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Leading whitespace width; a tab counts as four columns.
fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

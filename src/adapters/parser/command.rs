use crate::domain::feed::ParsedElement;
use crate::domain::ports::SourceParser;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// What an external parser may print: a bare element list or `{"elements": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CommandOutput {
    List(Vec<ParsedElement>),
    Wrapped { elements: Vec<ParsedElement> },
}

/// Delegates parsing to an external program.
///
/// The program runs in the workspace root with the workspace-relative file path
/// appended to its arguments, and must print the element feed as JSON.
#[derive(Debug, Clone)]
pub struct CommandParser {
    program: String,
    args: Vec<String>,
    extensions: Vec<String>,
    root: PathBuf,
}

impl CommandParser {
    /// `command` is the program followed by its fixed arguments.
    pub fn new(command: &[String], extensions: &[String], root: impl Into<PathBuf>) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("Parser command is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect(),
            root: root.into(),
        })
    }
}

impl SourceParser for CommandParser {
    fn supports(&self, path: &str) -> bool {
        path.rsplit_once('.')
            .is_some_and(|(_, ext)| self.extensions.iter().any(|e| e == ext))
    }

    fn parse(&self, path: &str, _source: &str) -> Result<Vec<ParsedElement>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run parser command `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Parser command `{}` exited with {} for {}: {}",
                self.program,
                output.status,
                path,
                stderr.trim()
            );
        }

        let parsed: CommandOutput = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Parser command `{}` printed invalid JSON for {}", self.program, path))?;
        Ok(match parsed {
            CommandOutput::List(elements) | CommandOutput::Wrapped { elements } => elements,
        })
    }
}

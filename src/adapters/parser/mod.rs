//! Source parser adapters
//!
//! Every language reaches the graph through the same element feed. This module
//! provides the built-in Python outline parser, a parser that shells out to an
//! external command, and a router choosing between them by file extension.

mod command;
mod python;

pub use command::CommandParser;
pub use python::PythonOutlineParser;

use crate::domain::feed::ParsedElement;
use crate::domain::ports::SourceParser;
use anyhow::{Result, anyhow};

/// Multi-language parser that routes each file to the first parser claiming it
pub struct ParserRouter {
    parsers: Vec<Box<dyn SourceParser>>,
}

impl ParserRouter {
    /// Router with only the built-in Python parser
    pub fn new() -> Self {
        Self {
            parsers: vec![Box::new(PythonOutlineParser)],
        }
    }

    /// Router trying the external `command` parser before the built-in ones
    pub fn with_command(command: CommandParser) -> Self {
        Self {
            parsers: vec![Box::new(command), Box::new(PythonOutlineParser)],
        }
    }

    fn route(&self, path: &str) -> Option<&dyn SourceParser> {
        self.parsers
            .iter()
            .find(|p| p.supports(path))
            .map(|p| p.as_ref())
    }
}

impl Default for ParserRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for ParserRouter {
    fn supports(&self, path: &str) -> bool {
        self.route(path).is_some()
    }

    fn parse(&self, path: &str, source: &str) -> Result<Vec<ParsedElement>> {
        self.route(path)
            .ok_or_else(|| anyhow!("No parser for {path}"))?
            .parse(path, source)
    }
}

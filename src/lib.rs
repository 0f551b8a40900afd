//! test-impact library: code-element dependency graph, change detection and
//! change-driven test selection.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod logging;
pub mod server;

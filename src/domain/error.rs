/// Lookup failures surfaced by graph and selector queries.
///
/// Everything else in the core (parse failures, corrupt snapshots, unresolved
/// calls) is recovered where it happens and never reaches the caller.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Query by an ID that is not (or no longer) in the graph.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Test ID that no element carries.
    #[error("Test not found: {0}")]
    TestNotFound(String),
}

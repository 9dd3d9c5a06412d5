use std::time::Duration;
use thiserror::Error;

/// Main error type for relgraph
#[derive(Error, Debug)]
pub enum RelgraphError {
    /// Relational store errors, surfaced unmodified (no retries at this layer)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid input (bad identifiers, negative weights, malformed handles)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An in-progress walk crossed a hard limit
    #[error("Safety limit exceeded at depth {depth}: {nodes} nodes visited (limit {limit})")]
    SafetyLimitExceeded {
        depth: usize,
        nodes: usize,
        limit: usize,
    },

    /// The pre-traversal estimate does not fit the node budget
    #[error(
        "Subgraph too large: estimated {estimate} nodes exceeds budget of {budget} ({reason}). \
         Narrow the query with a filter, raise max_nodes, or skip estimation explicitly"
    )]
    SubgraphTooLarge {
        estimate: usize,
        budget: usize,
        reason: String,
    },

    /// The per-call wall-clock budget elapsed
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking worker running the call failed
    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Convenient Result type using RelgraphError
pub type Result<T> = std::result::Result<T, RelgraphError>;

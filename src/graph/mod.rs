//! Graph vocabulary shared by every engine: handles, nodes, edges, limits.
//!
//! Nothing here outlives a single call. A [`GraphHandle`] names the relational
//! objects that hold the graph; the engines read through it and keep no state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::ident::validate_identifier;
use crate::estimate::EstimationConfig;
use crate::error::{RelgraphError, Result};

/// Absolute traversal depth ceiling (overridable per call via [`Limits`]).
pub const MAX_DEPTH: usize = 50;
/// Default node budget per call.
pub const MAX_NODES: usize = 10_000;
/// Default cap on returned node records.
pub const MAX_RESULTS: usize = 1_000;
/// Default per-call wall-clock budget.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Node identifier as stored in the id column.
pub type NodeId = i64;

/// Which way edges are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// source -> target, as stored
    #[default]
    Outbound,
    /// target -> source
    Inbound,
    /// undirected reachability
    Both,
}

impl Direction {
    /// Direction used to walk back toward the start.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outbound => Direction::Inbound,
            Direction::Inbound => Direction::Outbound,
            Direction::Both => Direction::Both,
        }
    }
}

/// Immutable descriptor of the relations holding a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphHandle {
    pub node_table: String,
    pub edge_table: String,
    pub edge_from: String,
    pub edge_to: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default)]
    pub direction: Direction,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl GraphHandle {
    pub fn new(
        node_table: impl Into<String>,
        edge_table: impl Into<String>,
        edge_from: impl Into<String>,
        edge_to: impl Into<String>,
    ) -> Self {
        Self {
            node_table: node_table.into(),
            edge_table: edge_table.into(),
            edge_from: edge_from.into(),
            edge_to: edge_to.into(),
            id_column: default_id_column(),
            direction: Direction::Outbound,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    /// Reject names that cannot be safely quoted as SQL identifiers.
    pub fn validate(&self) -> Result<()> {
        for name in [
            &self.node_table,
            &self.edge_table,
            &self.edge_from,
            &self.edge_to,
            &self.id_column,
        ] {
            validate_identifier(name)?;
        }
        if self.edge_from == self.edge_to {
            return Err(RelgraphError::InvalidInput(format!(
                "edge source and target columns must differ (both are '{}')",
                self.edge_from
            )));
        }
        Ok(())
    }
}

/// A node: its id plus the attribute columns that were requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub attributes: Map<String, Value>,
}

/// An edge in walk orientation: `from` is the side the walk came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// True when the stored row points `to -> from`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reversed: bool,
}

/// Hard ceilings for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_depth_ceiling")]
    pub max_depth_ceiling: usize,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_depth_ceiling() -> usize {
    MAX_DEPTH
}

fn default_max_nodes() -> usize {
    MAX_NODES
}

fn default_max_results() -> usize {
    MAX_RESULTS
}

fn default_timeout_secs() -> u64 {
    QUERY_TIMEOUT.as_secs()
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth_ceiling: MAX_DEPTH,
            max_nodes: MAX_NODES,
            max_results: MAX_RESULTS,
            timeout_secs: QUERY_TIMEOUT.as_secs(),
        }
    }
}

impl Limits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Clamp a requested depth to the ceiling, reporting when it was lowered.
    pub fn clamp_depth(&self, requested: usize) -> (usize, Option<Warning>) {
        if requested > self.max_depth_ceiling {
            log::warn!(
                "Requested depth {} exceeds ceiling {}, clamping",
                requested,
                self.max_depth_ceiling
            );
            (
                self.max_depth_ceiling,
                Some(Warning::DepthClamped {
                    requested,
                    ceiling: self.max_depth_ceiling,
                }),
            )
        } else {
            (requested, None)
        }
    }
}

/// How a call decides whether it is safe to start.
///
/// Bypassing estimation has to be spelled out at the call site.
#[derive(Debug, Clone, PartialEq)]
pub enum EstimationPolicy {
    /// Sample the graph and run the guards.
    Estimate(EstimationConfig),
    /// Trust the caller; only the in-loop budget check applies.
    Skip,
    /// Use the caller's own upper bound on reachable nodes instead of sampling.
    /// `config` still supplies the tolerance band for the volume check.
    Override {
        bound: usize,
        config: EstimationConfig,
    },
}

impl Default for EstimationPolicy {
    fn default() -> Self {
        EstimationPolicy::Estimate(EstimationConfig::default())
    }
}

impl EstimationPolicy {
    /// Thresholds in force for this call; `None` when estimation is skipped.
    pub fn config(&self) -> Option<&EstimationConfig> {
        match self {
            EstimationPolicy::Estimate(config) => Some(config),
            EstimationPolicy::Override { config, .. } => Some(config),
            EstimationPolicy::Skip => None,
        }
    }
}

/// What happens when a walk crosses the node budget mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail the call with `SafetyLimitExceeded`.
    #[default]
    Fail,
    /// Stop expanding and return what was reached, marked truncated.
    Truncate,
}

/// Non-fatal conditions surfaced alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    OverBudget { estimate: usize, budget: usize },
    DepthClamped { requested: usize, ceiling: usize },
    ResultsTruncated { total: usize, returned: usize },
    SampleTruncated { visited: usize, cap: usize },
    WholeGraphRecommended { algorithm: String },
    AggregateRecommended { edge_table: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::OverBudget { estimate, budget } => write!(
                f,
                "estimated {} nodes exceeds budget of {}; proceeding within tolerance",
                estimate, budget
            ),
            Warning::DepthClamped { requested, ceiling } => {
                write!(f, "depth {} clamped to ceiling {}", requested, ceiling)
            }
            Warning::ResultsTruncated { total, returned } => write!(
                f,
                "{} nodes reached, only the first {} returned",
                total, returned
            ),
            Warning::SampleTruncated { visited, cap } => write!(
                f,
                "sampling stopped at {} nodes (cap {}); estimate is a lower bound",
                visited, cap
            ),
            Warning::WholeGraphRecommended { algorithm } => write!(
                f,
                "{} needs global information; neighborhood scores are local only",
                algorithm
            ),
            Warning::AggregateRecommended { edge_table } => write!(
                f,
                "{} is a pure junction table; an aggregate query is cheaper",
                edge_table
            ),
        }
    }
}

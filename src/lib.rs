pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod estimate;
pub mod graph;
pub mod guard;
pub mod handlers;
pub mod pathfinding;
pub mod traversal;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use db::filter::Filter;
pub use db::store::{GraphStore, SqliteStore};
pub use db::{Db, Deadline};
pub use error::{RelgraphError, Result};
pub use graph::{
    Direction, Edge, EstimationPolicy, GraphHandle, Limits, Node, NodeId, OverflowPolicy, Warning,
};
pub use guard::{AlgorithmKind, GuardResult, RecommendedAction};

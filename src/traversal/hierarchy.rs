//! Quantity roll-up over hierarchical graphs (bills of materials and the like).
//!
//! The walk itself is the ordinary frontier BFS; quantities are then summed over
//! every path of length <= max_depth, so a subassembly used in two places counts
//! twice. NULL quantities multiply as 1. Roll-ups need a direction: an
//! undirected walk would send quantities back up to the parent.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Map;

use super::{cap_results, walk, TraversalOptions};
use crate::db::ident::validate_identifier;
use crate::db::store::GraphStore;
use crate::db::Deadline;
use crate::error::{RelgraphError, Result};
use crate::guard::GuardResult;
use crate::graph::{Direction, GraphHandle, NodeId, Warning};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HierarchyOptions {
    pub traversal: TraversalOptions,
    /// Edge column carrying the per-edge multiplier.
    pub quantity_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub id: NodeId,
    /// Shallowest depth at which the node occurs.
    pub depth: usize,
    pub path: Vec<NodeId>,
    /// Product of quantities along each path, summed over all paths.
    pub total_quantity: f64,
    pub attributes: Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyResult {
    pub root: NodeId,
    pub components: Vec<HierarchyNode>,
    pub nodes_visited: usize,
    pub depth_reached: usize,
    pub terminated_at: Vec<NodeId>,
    pub truncated: bool,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

/// Walk from `root` and accumulate the total quantity of every reached node.
pub fn traverse_hierarchy<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    root: NodeId,
    options: &HierarchyOptions,
    deadline: &Deadline,
) -> Result<HierarchyResult> {
    if handle.direction == Direction::Both {
        return Err(RelgraphError::InvalidInput(
            "hierarchy roll-up needs an outbound or inbound direction".to_string(),
        ));
    }
    if let Some(column) = &options.quantity_column {
        validate_identifier(column)?;
    }
    let traversal = &options.traversal;
    let mut walk = walk(
        store,
        handle,
        root,
        traversal,
        options.quantity_column.as_deref(),
        deadline,
    )?;

    let mut adjacency: HashMap<NodeId, Vec<(NodeId, f64)>> = HashMap::new();
    for edge in &walk.edges {
        adjacency
            .entry(edge.from)
            .or_default()
            .push((edge.to, edge.weight.unwrap_or(1.0)));
    }

    // level[v] = summed products over paths of exactly `length` edges ending at v
    let mut totals: HashMap<NodeId, f64> = HashMap::new();
    let mut level: HashMap<NodeId, f64> = HashMap::new();
    if walk.start_exists() {
        level.insert(root, 1.0);
    }
    for _length in 1..=walk.max_depth {
        deadline.check()?;
        let mut next: HashMap<NodeId, f64> = HashMap::new();
        for (node, amount) in &level {
            for (child, qty) in adjacency.get(node).into_iter().flatten() {
                *next.entry(*child).or_insert(0.0) += amount * qty;
            }
        }
        if next.is_empty() {
            break;
        }
        for (node, amount) in &next {
            *totals.entry(*node).or_insert(0.0) += amount;
        }
        level = next;
    }

    let reported = walk.reported(traversal.include_start);
    let returned = cap_results(&reported, traversal.limits.max_results, &mut walk.warnings);
    let mut attributes: HashMap<NodeId, Map<String, serde_json::Value>> = store
        .fetch_nodes(handle, &returned, traversal.node_columns.as_deref())?
        .into_iter()
        .map(|n| (n.id, n.attributes))
        .collect();

    let components = returned
        .iter()
        .map(|id| HierarchyNode {
            id: *id,
            depth: walk.visited.get(id).map(|v| v.depth).unwrap_or(0),
            path: walk.path_to(*id),
            total_quantity: if *id == root {
                1.0
            } else {
                totals.get(id).copied().unwrap_or(0.0)
            },
            attributes: attributes.remove(id).unwrap_or_default(),
        })
        .collect();

    log::debug!(
        "Rolled up {} components under {} to depth {}",
        reported.len(),
        root,
        walk.max_depth
    );

    Ok(HierarchyResult {
        root,
        components,
        nodes_visited: reported.len(),
        depth_reached: walk.deepest(&returned),
        terminated_at: walk.terminated_at,
        truncated: walk.truncated,
        guard: walk.guard,
        warnings: walk.warnings,
    })
}

//! Count-based statistics and single-hop lookups that never load the graph.

use std::collections::HashSet;

use serde::Serialize;

use crate::db::filter::Filter;
use crate::db::store::{EdgeQuery, GraphStore};
use crate::error::Result;
use crate::graph::{Direction, GraphHandle, Limits, Node, NodeId, Warning};
use crate::traversal::cap_results;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityResult {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub directed: bool,
}

/// Edge density from aggregate counts. `Direction::Both` treats the graph as undirected.
pub fn graph_density<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    edge_filter: Option<&Filter>,
) -> Result<DensityResult> {
    handle.validate()?;
    let node_count = store.count_nodes(handle)?;
    let edge_count = store.count_edges(handle, edge_filter)?;
    let directed = handle.direction != Direction::Both;
    Ok(DensityResult {
        node_count,
        edge_count,
        density: density(node_count, edge_count, directed),
        directed,
    })
}

pub(crate) fn density(nodes: usize, edges: usize, directed: bool) -> f64 {
    if nodes < 2 {
        return 0.0;
    }
    let pairs = (nodes * (nodes - 1)) as f64;
    let possible = if directed { pairs } else { pairs / 2.0 };
    (edges as f64 / possible).min(1.0)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NeighborOptions {
    pub limits: Limits,
    pub node_columns: Option<Vec<String>>,
    pub edge_filter: Option<Filter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NeighborsResult {
    pub node: NodeId,
    pub found: bool,
    /// Edges leaving the node, as stored.
    pub outbound: usize,
    /// Edges arriving at the node, as stored.
    pub inbound: usize,
    pub total_distinct: usize,
    pub neighbors: Vec<Node>,
    pub warnings: Vec<Warning>,
}

/// Direct neighbors of `node` in the handle's direction, in one edge fetch.
pub fn neighbors<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    node: NodeId,
    options: &NeighborOptions,
) -> Result<NeighborsResult> {
    handle.validate()?;
    let mut warnings = Vec::new();
    if !store.node_exists(handle, node)? {
        return Ok(NeighborsResult {
            node,
            found: false,
            outbound: 0,
            inbound: 0,
            total_distinct: 0,
            neighbors: Vec::new(),
            warnings,
        });
    }

    let query = EdgeQuery::new(None, options.edge_filter.as_ref());
    let edges = store.fetch_edges_for_frontier(handle, &[node], &query)?;

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    let (mut outbound, mut inbound) = (0, 0);
    for edge in &edges {
        if edge.reversed {
            inbound += 1;
        } else {
            outbound += 1;
        }
        if seen.insert(edge.to) {
            ordered.push(edge.to);
        }
    }

    let returned = cap_results(&ordered, options.limits.max_results, &mut warnings);
    let neighbors = store.fetch_nodes(handle, &returned, options.node_columns.as_deref())?;
    log::debug!(
        "Node {} has {} outbound, {} inbound, {} distinct neighbors",
        node,
        outbound,
        inbound,
        ordered.len()
    );

    Ok(NeighborsResult {
        node,
        found: true,
        outbound,
        inbound,
        total_distinct: ordered.len(),
        neighbors,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::testutil::{self, handle, CountingStore};

    #[test]
    fn test_density_counts() {
        let conn = testutil::clique_graph(1, 4);
        let store = SqliteStore::new(&conn);
        let result = graph_density(&store, &handle(), None).unwrap();
        assert_eq!(result.node_count, 4);
        assert_eq!(result.edge_count, 12);
        assert!(result.directed);
        assert!((result.density - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_density_undirected_and_filtered() {
        let conn = testutil::bom_graph();
        let store = SqliteStore::new(&conn);
        let h = handle().with_direction(Direction::Both);
        let result = graph_density(&store, &h, None).unwrap();
        assert!(!result.directed);
        // 6 edges over 10 unordered pairs
        assert!((result.density - 0.6).abs() < 1e-9);

        let heavy = Filter::gt("quantity", 2.0);
        let filtered = graph_density(&store, &handle(), Some(&heavy)).unwrap();
        assert_eq!(filtered.edge_count, 2);
    }

    #[test]
    fn test_density_degenerate() {
        assert_eq!(density(0, 0, true), 0.0);
        assert_eq!(density(1, 3, false), 0.0);
        assert_eq!(density(2, 5, true), 1.0);
    }

    #[test]
    fn test_neighbors_both_directions_single_fetch() {
        let conn = testutil::bom_graph();
        let store = CountingStore::new(SqliteStore::new(&conn));
        let h = handle().with_direction(Direction::Both);
        let result = neighbors(&store, &h, 4, &NeighborOptions::default()).unwrap();
        assert!(result.found);
        assert_eq!(result.outbound, 1);
        assert_eq!(result.inbound, 2);
        assert_eq!(result.total_distinct, 3);
        assert_eq!(store.edge_fetches.get(), 1);
        let mut ids: Vec<NodeId> = result.neighbors.iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3, 5]);
    }

    #[test]
    fn test_neighbors_outbound_only_and_capped() {
        let conn = testutil::tree_graph(4, 1);
        let store = SqliteStore::new(&conn);
        let options = NeighborOptions {
            limits: Limits {
                max_results: 2,
                ..Limits::default()
            },
            ..NeighborOptions::default()
        };
        let result = neighbors(&store, &handle(), 1, &options).unwrap();
        assert_eq!(result.outbound, 4);
        assert_eq!(result.inbound, 0);
        assert_eq!(result.total_distinct, 4);
        assert_eq!(result.neighbors.len(), 2);
        assert!(matches!(
            result.warnings[0],
            Warning::ResultsTruncated { total: 4, returned: 2 }
        ));
    }

    #[test]
    fn test_neighbors_missing_node() {
        let conn = testutil::bom_graph();
        let store = SqliteStore::new(&conn);
        let result = neighbors(&store, &handle(), 99, &NeighborOptions::default()).unwrap();
        assert!(!result.found);
        assert_eq!(result.total_distinct, 0);
    }
}
